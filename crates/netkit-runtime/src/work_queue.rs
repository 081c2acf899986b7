//! Double-buffered work queue
//!
//! Design:
//! - Input side: producers `push_back` under the input lock only
//! - Output side: consumers `pop_front` under the output lock only
//! - When output runs dry, a consumer swaps the two `VecDeque`s while holding
//!   both locks (output first, then input). The swap is O(1) whatever the
//!   depth, so the input lock is held for a pointer exchange.
//!
//! An item lives on exactly one side at a time, so nothing is lost or
//! duplicated however pushes and pops interleave. FIFO order holds for a
//! single producer; with several producers each producer's own items stay
//! in order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use netkit_core::SpinLock;

/// Two-sided FIFO.
pub struct WorkQueue<T> {
    input: SpinLock<VecDeque<T>>,
    output: SpinLock<VecDeque<T>>,
    /// Items on the input side (advisory)
    in_len: AtomicUsize,
    /// Items on the output side (advisory)
    out_len: AtomicUsize,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            input: SpinLock::new(VecDeque::with_capacity(capacity)),
            output: SpinLock::new(VecDeque::with_capacity(capacity)),
            in_len: AtomicUsize::new(0),
            out_len: AtomicUsize::new(0),
        }
    }

    /// Append to the input side. Never waits on consumers.
    pub fn push(&self, item: T) {
        let mut input = self.input.lock();
        input.push_back(item);
        self.in_len.store(input.len(), Ordering::Release);
    }

    /// Take the oldest item, or `None` if both sides are empty.
    pub fn pop(&self) -> Option<T> {
        let mut output = self.output.lock();
        if let Some(item) = output.pop_front() {
            self.out_len.store(output.len(), Ordering::Release);
            return Some(item);
        }

        // Output is dry; skip the input lock when there is clearly nothing.
        if self.in_len.load(Ordering::Acquire) == 0 {
            return None;
        }
        {
            let mut input = self.input.lock();
            std::mem::swap(&mut *output, &mut *input);
            self.in_len.store(input.len(), Ordering::Release);
        }

        let item = output.pop_front();
        self.out_len.store(output.len(), Ordering::Release);
        item
    }

    /// Take up to `max` items into `buf`. Returns how many were taken.
    pub fn pop_batch(&self, buf: &mut Vec<T>, max: usize) -> usize {
        let mut taken = 0;
        while taken < max {
            match self.pop() {
                Some(item) => {
                    buf.push(item);
                    taken += 1;
                }
                None => break,
            }
        }
        taken
    }

    /// Sum of both sides. Advisory: the two sides are read separately.
    #[inline]
    pub fn len(&self) -> usize {
        self.in_len.load(Ordering::Acquire) + self.out_len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything queued. Returns how many items were discarded.
    pub fn clear(&self) -> usize {
        let mut output = self.output.lock();
        let mut input = self.input.lock();
        let n = output.len() + input.len();
        output.clear();
        input.clear();
        self.out_len.store(0, Ordering::Release);
        self.in_len.store(0, Ordering::Release);
        n
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("in_len", &self.in_len.load(Ordering::Relaxed))
            .field("out_len", &self.out_len.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_single_producer() {
        let q = WorkQueue::new();
        for i in 0..10 {
            q.push(i);
        }
        assert_eq!(q.len(), 10);

        // Interleave a push after the first swap; it lands behind the batch.
        assert_eq!(q.pop(), Some(0));
        q.push(10);
        for expected in 1..=10 {
            assert_eq!(q.pop(), Some(expected));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_pop_empty_returns_none() {
        let q: WorkQueue<u32> = WorkQueue::new();
        assert_eq!(q.pop(), None);
        assert_eq!(q.pop(), None);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_pop_batch_and_clear() {
        let q = WorkQueue::with_capacity(8);
        for i in 0..5 {
            q.push(i);
        }
        let mut buf = Vec::new();
        assert_eq!(q.pop_batch(&mut buf, 3), 3);
        assert_eq!(buf, vec![0, 1, 2]);

        q.push(99);
        assert_eq!(q.clear(), 3);
        assert!(q.is_empty());
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_concurrent_no_loss_no_duplication() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: usize = 5_000;

        let q = Arc::new(WorkQueue::new());
        let producers_done = Arc::new(AtomicBool::new(false));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        q.push(p * PER_PRODUCER + i);
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let q = Arc::clone(&q);
                let done = Arc::clone(&producers_done);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    loop {
                        match q.pop() {
                            Some(v) => seen.push(v),
                            None if done.load(Ordering::Acquire) && q.is_empty() => break,
                            None => thread::yield_now(),
                        }
                    }
                    seen
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        producers_done.store(true, Ordering::Release);

        let mut counts: HashMap<usize, usize> = HashMap::new();
        for c in consumers {
            for v in c.join().unwrap() {
                *counts.entry(v).or_default() += 1;
            }
        }

        assert_eq!(counts.len(), PRODUCERS * PER_PRODUCER);
        assert!(counts.values().all(|&n| n == 1));
    }

    #[test]
    fn test_per_producer_order_preserved() {
        let q = Arc::new(WorkQueue::new());
        let producers: Vec<_> = (0..2u64)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..1_000u64 {
                        q.push((p, i));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let mut last = [None::<u64>; 2];
        while let Some((p, i)) = q.pop() {
            if let Some(prev) = last[p as usize] {
                assert!(i > prev);
            }
            last[p as usize] = Some(i);
        }
        assert_eq!(last, [Some(999), Some(999)]);
    }
}
