//! Asynchronous record writing: a bounded queue drained by one thread.
//!
//! The producer enqueues records; a single drain thread writes them through
//! the synchronous writer, preserving insertion order. Backpressure is
//! strict: a full queue blocks the producer. An error on the drain thread
//! tears the channel down, and the next producer call surfaces it exactly
//! once.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};

use crate::record::Record;
use crate::writer::{BamWriter, WriteError, WriteResult};

/// Default queue capacity, in records.
pub const DEFAULT_QUEUE_DEPTH: usize = 2000;

/// A write handle backed by a drain thread.
pub struct AsyncBamWriter<W: std::io::Write + Send + 'static> {
    sender: Option<Sender<Record>>,
    handle: Option<JoinHandle<WriteResult<(W, u64)>>>,
}

impl<W: std::io::Write + Send + 'static> AsyncBamWriter<W> {
    pub fn new(writer: BamWriter<W>) -> Self {
        Self::with_queue_depth(writer, DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(mut writer: BamWriter<W>, depth: usize) -> Self {
        let (sender, receiver) = bounded::<Record>(depth.max(1));
        let handle = thread::spawn(move || {
            // Returning early drops the receiver, which makes the
            // producer's next send fail instead of blocking forever.
            for record in receiver {
                writer.write_record(&record)?;
            }
            writer.finish_with_length()
        });
        AsyncBamWriter {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    /// Enqueues a record, blocking while the queue is full. If the drain
    /// thread has failed, its error is re-raised here.
    pub fn write(&mut self, record: Record) -> WriteResult<()> {
        let sender = self.sender.as_ref().ok_or(WriteError::BackgroundClosed)?;
        if sender.send(record).is_err() {
            self.sender = None;
            return Err(self.take_drain_error());
        }
        Ok(())
    }

    /// Closes the queue, waits for the drain thread, and returns the
    /// underlying sink and compressed length. A latched drain error is
    /// re-raised here if no `write` call observed it first.
    pub fn finish(mut self) -> WriteResult<(W, u64)> {
        self.sender = None; // closes the channel; the drain loop ends
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| WriteError::BackgroundClosed)?,
            None => Err(WriteError::BackgroundClosed),
        }
    }

    fn take_drain_error(&mut self) -> WriteError {
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(Ok(_)) => WriteError::BackgroundClosed,
                Ok(Err(e)) => e,
                Err(_) => WriteError::BackgroundClosed,
            },
            None => WriteError::BackgroundClosed,
        }
    }
}
