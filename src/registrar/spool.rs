// SPDX-License-Identifier: Apache-2.0

use std::mem;

use super::RegistrarHandle;
use super::event::RegistrarEvent;
use crate::error::{Error, Result};

/// Worker-side buffer of registrar events.
///
/// Events are collected with [`add`](Self::add) and submitted together by
/// [`send`](Self::send). The registrar applies a batch in order and never
/// persists half of one.
pub struct EventSpool {
    handle: RegistrarHandle,
    events: Vec<RegistrarEvent>,
}

impl EventSpool {
    pub fn new(handle: RegistrarHandle) -> Self {
        Self {
            handle,
            events: Vec::new(),
        }
    }

    pub fn add(&mut self, event: RegistrarEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Submit buffered events, waiting for intake capacity if necessary.
    ///
    /// If the registrar has stopped the events stay buffered.
    pub async fn send(&mut self) -> Result<()> {
        if self.events.is_empty() {
            return Ok(());
        }
        let events = mem::take(&mut self.events);
        match self.handle.submit_or_return(events).await {
            Ok(()) => Ok(()),
            Err(events) => {
                self.events = events;
                Err(Error::RegistrarClosed)
            }
        }
    }

    /// Blocking variant of [`send`](Self::send) for workers on plain threads.
    pub fn send_blocking(&mut self) -> Result<()> {
        if self.events.is_empty() {
            return Ok(());
        }
        let events = mem::take(&mut self.events);
        match self.handle.submit_blocking_or_return(events) {
            Ok(()) => Ok(()),
            Err(events) => {
                self.events = events;
                Err(Error::RegistrarClosed)
            }
        }
    }
}
