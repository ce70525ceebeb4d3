//! Bounded in-process pipes between adjacent stream stages.
//!
//! [`spawn`] moves a producing iterator onto its own thread and hands back an
//! iterator over a bounded channel. A slow consumer blocks the producer once
//! `capacity` items are queued. Dropping the pipe disconnects the channel
//! and joins the producer, so whatever the producer owns (a sort scratch
//! directory, open files) is released before the drop returns.

use crate::error::{DumpError, Result};
use std::sync::mpsc;
use std::thread;

pub struct Pipe<T, S> {
    name: String,
    receiver: Option<mpsc::Receiver<Result<T>>>,
    handle: Option<thread::JoinHandle<S>>,
    source: Option<S>,
}

/// Run `source` on a producer thread connected by a channel of `capacity`.
///
/// The producer stops after forwarding the first error.
pub fn spawn<S, T>(name: &str, capacity: usize, source: S) -> Result<Pipe<T, S>>
where
    S: Iterator<Item = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
    let handle = thread::Builder::new()
        .name(format!("pipe-{name}"))
        .spawn(move || {
            let mut source = source;
            for item in source.by_ref() {
                let failed = item.is_err();
                if sender.send(item).is_err() || failed {
                    break;
                }
            }
            source
        })?;
    Ok(Pipe {
        name: name.to_string(),
        receiver: Some(receiver),
        handle: Some(handle),
        source: None,
    })
}

impl<T, S> Pipe<T, S> {
    fn join(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(source) => self.source = Some(source),
                Err(_) => return Err(DumpError::PipeBroken(self.name.clone())),
            }
        }
        Ok(())
    }

    /// Stop the producer and return its iterator, e.g. to read counters.
    pub fn finish(mut self) -> Result<S> {
        self.receiver.take();
        self.join()?;
        self.source
            .take()
            .ok_or_else(|| DumpError::PipeBroken(self.name.clone()))
    }
}

impl<T, S> Iterator for Pipe<T, S> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let receiver = self.receiver.as_ref()?;
        match receiver.recv() {
            Ok(item) => Some(item),
            Err(_) => {
                // Producer is gone; distinguish clean exhaustion from a panic.
                self.receiver = None;
                self.join().err().map(Err)
            }
        }
    }
}

impl<T, S> Drop for Pipe<T, S> {
    fn drop(&mut self) {
        self.receiver.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
