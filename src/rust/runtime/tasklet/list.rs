// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::tasklet::Tasklet;
use ::std::{
    collections::VecDeque,
    mem,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// FIFO of scheduled tasklets. The list owns a handle to every tasklet linked into it.
#[derive(Default)]
pub struct TaskletList {
    queue: VecDeque<Tasklet>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TaskletList {
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn push_back(&mut self, tasklet: Tasklet) {
        self.queue.push_back(tasklet);
    }

    pub fn pop_front(&mut self) -> Option<Tasklet> {
        self.queue.pop_front()
    }

    /// Detaches every tasklet, leaving the list empty.
    pub fn take(&mut self) -> TaskletList {
        mem::take(self)
    }

    /// Splices `other` onto the tail of the target list.
    pub fn append(&mut self, mut other: TaskletList) {
        self.queue.append(&mut other.queue);
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
