//! Blocking FIFO queue with a pollable event descriptor
//!
//! The reader thread pushes decoded message snapshots here. Consumers either
//! block in [`MessageQueue::pop`] or multiplex [`MessageQueue::event_fd`] with
//! other descriptors and drain with [`MessageQueue::try_pop`].

use nix::sys::eventfd::{EfdFlags, EventFd};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::os::fd::{AsFd, BorrowedFd};
use std::time::{Duration, Instant};

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Thread-safe FIFO queue
pub struct MessageQueue<T> {
    state: Mutex<State<T>>,
    available: Condvar,
    event: Option<EventFd>,
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        let event = match EventFd::from_value_and_flags(0, EfdFlags::EFD_NONBLOCK) {
            Ok(fd) => Some(fd),
            Err(e) => {
                log::warn!("Unable to create queue event descriptor: {}", e);
                None
            }
        };
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
            event,
        }
    }

    /// Append an item and signal the event descriptor
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        state.items.push_back(item);
        if let Some(event) = &self.event {
            if let Err(e) = event.write(1) {
                log::debug!("Queue event write failed: {}", e);
            }
        }
        drop(state);
        self.available.notify_one();
    }

    /// Block until an item is available; `None` once closed and drained
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Wait at most `timeout` for an item
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return state.items.pop_front();
            }
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Wake all blocked consumers; pops return `None` once drained
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
        if let Some(event) = &self.event {
            let _ = event.write(1);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Descriptor that is readable after every push
    pub fn event_fd(&self) -> Option<BorrowedFd<'_>> {
        self.event.as_ref().map(|event| event.as_fd())
    }

    /// Reset the event descriptor after it polled readable
    pub fn clear_event(&self) {
        if let Some(event) = &self.event {
            // EAGAIN when already reset
            let _ = event.read();
        }
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let queue = MessageQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.pop_timeout(Duration::from_millis(1)), Some(3));
        assert!(queue.is_empty());
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_blocking_pop_across_threads() {
        let queue = Arc::new(MessageQueue::new());
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push("frame");
        });
        assert_eq!(queue.pop(), Some("frame"));
        handle.join().unwrap();
    }

    #[test]
    fn test_close_wakes_consumer() {
        let queue: Arc<MessageQueue<u32>> = Arc::new(MessageQueue::new());
        let closer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });
        assert_eq!(queue.pop(), None);
        assert!(queue.is_closed());
        handle.join().unwrap();
    }

    #[test]
    fn test_pop_timeout_expires() {
        let queue: MessageQueue<u8> = MessageQueue::new();
        let start = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_event_fd_readable_after_push() {
        let queue = MessageQueue::new();
        let fd = queue.event_fd().expect("eventfd available");

        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        assert_eq!(poll(&mut fds, PollTimeout::ZERO).unwrap(), 0);

        queue.push(7u8);
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        assert_eq!(poll(&mut fds, PollTimeout::from(100u16)).unwrap(), 1);

        queue.clear_event();
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        assert_eq!(poll(&mut fds, PollTimeout::ZERO).unwrap(), 0);
        assert_eq!(queue.try_pop(), Some(7));
    }
}
