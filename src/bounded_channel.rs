// SPDX-License-Identifier: Apache-2.0

//! Bounded multi-producer channel used as the registrar intake.
//!
//! Producers are tailing workers, which may live on tokio tasks or on
//! dedicated OS threads, so both async and blocking send paths are offered.
//! A full channel applies backpressure to the producer.

use flume::{Receiver, Sender};
use std::fmt;

/// The receiver is gone. Carries the item that could not be delivered.
#[derive(PartialEq, Eq)]
pub enum SendError<T> {
    Disconnected(T),
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SendError::Disconnected(item) => item,
        }
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected(_) => write!(f, "Disconnected(..)"),
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected(_) => write!(f, "channel disconnected"),
        }
    }
}

impl<T> std::error::Error for SendError<T> {}

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

impl<T> BoundedSender<T> {
    pub async fn send(&self, item: T) -> Result<(), SendError<T>> {
        self.tx
            .send_async(item)
            .await
            .map_err(|e| SendError::Disconnected(e.into_inner()))
    }

    /// Blocks the calling thread until there is capacity in the channel.
    pub fn send_blocking(&self, item: T) -> Result<(), SendError<T>> {
        self.tx
            .send(item)
            .map_err(|e| SendError::Disconnected(e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Returns None once every sender has been dropped and the channel is empty.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Returns None if no item is available or the channel is disconnected.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);

    (BoundedSender { tx }, BoundedReceiver { rx })
}
