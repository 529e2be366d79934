//! A bounded, flow-controlled byte queue with a two-phase claim/commit protocol.
//!
//! Space (for writers) or data (for readers) is first claimed as a contiguous region of the ring, used in place, and
//! then committed. Nothing becomes visible to the other side until it is committed, so a writer can fill a region
//! while a USB transfer reads from another. Claims are represented by the [`WriteGrant`] and [`ReadGrant`] guards;
//! dropping a grant without committing it is the same as committing zero bytes.
//!
//! Each side is guarded by a binary semaphore, so at most one writer and one reader hold a grant at any time. A
//! readiness signal lets a consumer sleep until something has been written.

use core::cell::{Cell, UnsafeCell};
use core::convert::Infallible;
use core::ops::{Deref, DerefMut};
use embassy_sync::blocking_mutex::{Mutex as BlockingMutex, raw::RawMutex};
use embassy_sync::semaphore::{GreedySemaphore, Semaphore, SemaphoreReleaser};
use embassy_sync::signal::Signal;
use embassy_time::{Duration, with_timeout};
use thiserror::Error;

/// Reasons a queue operation could not proceed. None of these leave the queue modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QueueError {
    /// Another grant on the same side is outstanding.
    #[error("another claim is in progress")]
    Busy,
    /// Not enough free space for an all-or-nothing write.
    #[error("not enough free space")]
    Full,
    /// Nothing became readable before the timeout elapsed.
    #[error("timed out waiting for data")]
    Timeout,
}

/// How long a consumer is willing to wait for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Return immediately.
    NoWait,
    /// Give up after the given [`Duration`].
    After(Duration),
    /// Wait as long as it takes.
    Forever,
}

/// Monotonic cursors; their difference is the number of committed, unread bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Cursors {
    /// Total bytes ever committed by writers.
    head: usize,
    /// Total bytes ever released by readers.
    tail: usize,
}

impl Cursors {
    fn occupied(&self) -> usize {
        self.head.wrapping_sub(self.tail)
    }
}

/// Ring buffer of `N` bytes (`N` must be a power of two) shared between one writer and one reader at a time.
pub struct FlowQueue<M: RawMutex, const N: usize> {
    buf: UnsafeCell<[u8; N]>,
    cursors: BlockingMutex<M, Cell<Cursors>>,
    writer: GreedySemaphore<M>,
    reader: GreedySemaphore<M>,
    ready: Signal<M, ()>,
}

// SAFETY: the buffer is only accessed through grants. The writer and reader semaphores allow at most one grant per
// side, and a write grant only ever covers free space while a read grant only covers committed data, so the regions
// handed out never overlap. Cursors are only touched inside the blocking mutex.
unsafe impl<M: RawMutex + Sync, const N: usize> Sync for FlowQueue<M, N> {}

impl<M: RawMutex, const N: usize> FlowQueue<M, N> {
    const CAPACITY_IS_POW2: () = assert!(N.is_power_of_two(), "capacity must be a power of two");

    /// Constructs an empty [`FlowQueue`].
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_IS_POW2;
        Self {
            buf: UnsafeCell::new([0; N]),
            cursors: BlockingMutex::new(Cell::new(Cursors { head: 0, tail: 0 })),
            writer: GreedySemaphore::new(1),
            reader: GreedySemaphore::new(1),
            ready: Signal::new(),
        }
    }

    /// Total size of the ring.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Committed bytes not yet released by a reader.
    pub fn occupied(&self) -> usize {
        self.cursors().occupied()
    }

    /// Space available to writers.
    pub fn free(&self) -> usize {
        N - self.occupied()
    }

    /// Returns `true` if nothing is waiting to be read.
    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    /// Claims up to `max_len` contiguous bytes of free space, waiting only if another writer holds a grant.
    ///
    /// The grant may be shorter than requested, or empty, when the queue is short on space; this never waits for a
    /// reader to make room.
    pub async fn claim_write(&self, max_len: usize) -> WriteGrant<'_, M, N> {
        let permit = unwrap_infallible(self.writer.acquire(1).await);
        self.write_grant(permit, max_len)
    }

    /// Like [`claim_write`](Self::claim_write), but fails with [`QueueError::Busy`] rather than wait for another
    /// writer.
    pub fn try_claim_write(&self, max_len: usize) -> Result<WriteGrant<'_, M, N>, QueueError> {
        let permit = self.writer.try_acquire(1).ok_or(QueueError::Busy)?;
        Ok(self.write_grant(permit, max_len))
    }

    /// Claims up to `max_len` contiguous committed bytes, waiting only if another reader holds a grant.
    ///
    /// The grant may be shorter than requested, or empty; this never waits for data (see
    /// [`wait_readable`](Self::wait_readable)).
    pub async fn claim_read(&self, max_len: usize) -> ReadGrant<'_, M, N> {
        let permit = unwrap_infallible(self.reader.acquire(1).await);
        self.read_grant(permit, max_len)
    }

    /// Like [`claim_read`](Self::claim_read), but fails with [`QueueError::Busy`] rather than wait for another reader.
    pub fn try_claim_read(&self, max_len: usize) -> Result<ReadGrant<'_, M, N>, QueueError> {
        let permit = self.reader.try_acquire(1).ok_or(QueueError::Busy)?;
        Ok(self.read_grant(permit, max_len))
    }

    /// Writes all of `bytes` or nothing, fails with [`QueueError::Full`] if they don't fit.
    pub fn try_write_all(&self, bytes: &[u8]) -> Result<(), QueueError> {
        let permit = self.writer.try_acquire(1).ok_or(QueueError::Busy)?;
        self.write_all_with(permit, bytes)
    }

    /// Writes all of `bytes` or nothing, waiting only for other writers.
    pub async fn write_all(&self, bytes: &[u8]) -> Result<(), QueueError> {
        let permit = unwrap_infallible(self.writer.acquire(1).await);
        self.write_all_with(permit, bytes)
    }

    /// Copies as many committed bytes as fit into `buf` and releases them, returning how many were read.
    pub fn try_read(&self, buf: &mut [u8]) -> Result<usize, QueueError> {
        let permit = self.reader.try_acquire(1).ok_or(QueueError::Busy)?;
        let mut read = 0;
        // at most two passes: up to the end of the ring, then from its start
        for _ in 0..2 {
            let (start, len) = self.readable_region(buf.len() - read);
            if len == 0 {
                break;
            }
            // SAFETY: the reader permit is held and the region lies within committed data
            let region = unsafe { self.region(start, len) };
            buf[read..read + len].copy_from_slice(region);
            self.commit_read(len);
            read += len;
        }
        drop(permit);
        Ok(read)
    }

    /// Waits until the queue holds data, per `timeout`. Nothing is claimed, so a timeout leaves the queue untouched.
    pub async fn wait_readable(&self, timeout: Timeout) -> Result<(), QueueError> {
        let readable = async {
            // the signal may be stale, so occupancy is rechecked after every wake
            while self.is_empty() {
                self.ready.wait().await;
            }
        };
        match timeout {
            Timeout::NoWait if self.is_empty() => Err(QueueError::Timeout),
            Timeout::NoWait => Ok(()),
            Timeout::After(duration) => with_timeout(duration, readable)
                .await
                .map_err(|_| QueueError::Timeout),
            Timeout::Forever => {
                readable.await;
                Ok(())
            }
        }
    }

    fn cursors(&self) -> Cursors {
        self.cursors.lock(|c| c.get())
    }

    fn writable_region(&self, max_len: usize) -> (usize, usize) {
        let cursors = self.cursors();
        let start = cursors.head % N;
        let len = max_len.min(N - cursors.occupied()).min(N - start);
        (start, len)
    }

    fn readable_region(&self, max_len: usize) -> (usize, usize) {
        let cursors = self.cursors();
        let start = cursors.tail % N;
        let len = max_len.min(cursors.occupied()).min(N - start);
        (start, len)
    }

    fn commit_write(&self, len: usize) {
        if len == 0 {
            return;
        }
        self.cursors.lock(|c| {
            let mut cursors = c.get();
            cursors.head = cursors.head.wrapping_add(len);
            c.set(cursors);
        });
        self.ready.signal(());
    }

    fn commit_read(&self, len: usize) {
        if len == 0 {
            return;
        }
        self.cursors.lock(|c| {
            let mut cursors = c.get();
            cursors.tail = cursors.tail.wrapping_add(len);
            c.set(cursors);
        });
    }

    /// # Safety
    ///
    /// The caller must hold the permit for the side the region belongs to, and `start..start + len` must lie
    /// entirely within that side's part of the ring for as long as the returned slice lives.
    #[allow(clippy::mut_from_ref)]
    unsafe fn region(&self, start: usize, len: usize) -> &mut [u8] {
        debug_assert!(start + len <= N);
        // SAFETY: upheld by the caller; see above
        unsafe { core::slice::from_raw_parts_mut(self.buf.get().cast::<u8>().add(start), len) }
    }

    fn write_grant<'a>(
        &'a self,
        permit: SemaphoreReleaser<'a, GreedySemaphore<M>>,
        max_len: usize,
    ) -> WriteGrant<'a, M, N> {
        let (start, len) = self.writable_region(max_len);
        WriteGrant {
            queue: self,
            // SAFETY: the writer permit is held and the region lies within free space, which a reader never touches
            buf: unsafe { self.region(start, len) },
            _permit: permit,
        }
    }

    fn read_grant<'a>(
        &'a self,
        permit: SemaphoreReleaser<'a, GreedySemaphore<M>>,
        max_len: usize,
    ) -> ReadGrant<'a, M, N> {
        let (start, len) = self.readable_region(max_len);
        ReadGrant {
            queue: self,
            // SAFETY: the reader permit is held and the region lies within committed data, which a writer never touches
            buf: unsafe { self.region(start, len) },
            _permit: permit,
        }
    }

    fn write_all_with(
        &self,
        permit: SemaphoreReleaser<'_, GreedySemaphore<M>>,
        bytes: &[u8],
    ) -> Result<(), QueueError> {
        // free space only grows while the writer permit is held
        if self.free() < bytes.len() {
            return Err(QueueError::Full);
        }
        let mut written = 0;
        while written < bytes.len() {
            let (start, len) = self.writable_region(bytes.len() - written);
            // SAFETY: the writer permit is held and the region lies within free space
            let region = unsafe { self.region(start, len) };
            region.copy_from_slice(&bytes[written..written + len]);
            self.commit_write(len);
            written += len;
        }
        drop(permit);
        Ok(())
    }
}

impl<M: RawMutex, const N: usize> Default for FlowQueue<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

fn unwrap_infallible<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

/// Claimed free space. Write into it, then [`commit`](Self::commit) the bytes that should become readable.
pub struct WriteGrant<'a, M: RawMutex, const N: usize> {
    queue: &'a FlowQueue<M, N>,
    buf: &'a mut [u8],
    _permit: SemaphoreReleaser<'a, GreedySemaphore<M>>,
}

impl<M: RawMutex, const N: usize> WriteGrant<'_, M, N> {
    /// Makes the first `len` bytes of the grant visible to readers. `len` is clamped to the size of the grant, and a
    /// length of zero abandons the claim.
    pub fn commit(self, len: usize) {
        self.queue.commit_write(len.min(self.buf.len()));
    }
}

impl<M: RawMutex, const N: usize> Deref for WriteGrant<'_, M, N> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf
    }
}

impl<M: RawMutex, const N: usize> DerefMut for WriteGrant<'_, M, N> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf
    }
}

/// Claimed data. Read from it, then [`commit`](Self::commit) the bytes that may be overwritten.
pub struct ReadGrant<'a, M: RawMutex, const N: usize> {
    queue: &'a FlowQueue<M, N>,
    buf: &'a [u8],
    _permit: SemaphoreReleaser<'a, GreedySemaphore<M>>,
}

impl<M: RawMutex, const N: usize> ReadGrant<'_, M, N> {
    /// Releases the first `len` bytes of the grant back to free space. `len` is clamped to the size of the grant, and
    /// a length of zero leaves the data in place for the next reader.
    pub fn commit(self, len: usize) {
        self.queue.commit_read(len.min(self.buf.len()));
    }
}

impl<M: RawMutex, const N: usize> Deref for ReadGrant<'_, M, N> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::{block_on, join::join, yield_now};
    use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};

    type Queue = FlowQueue<NoopRawMutex, 16>;

    #[test]
    fn claim_write_is_bounded_by_free_space() {
        let queue = Queue::new();
        let mut grant = queue.try_claim_write(12).unwrap();
        assert_eq!(12, grant.len());
        grant.copy_from_slice(&[7; 12]);
        grant.commit(12);

        let grant = queue.try_claim_write(12).unwrap();
        assert_eq!(4, grant.len(), "Expected grant to shrink to the remaining space");
        drop(grant);
        assert_eq!(12, queue.occupied());
    }

    #[test]
    fn claim_read_is_bounded_by_occupancy() {
        let queue = Queue::new();
        assert_eq!(0, queue.try_claim_read(4).unwrap().len());

        queue.try_write_all(&[1, 2, 3]).unwrap();
        let grant = queue.try_claim_read(8).unwrap();
        assert_eq!(&[1, 2, 3], &*grant);
        grant.commit(2);
        assert_eq!(1, queue.occupied());
    }

    #[test]
    fn claims_stop_at_the_end_of_the_ring() {
        let queue = Queue::new();
        queue.try_write_all(&[0; 12]).unwrap();
        assert_eq!(12, queue.try_read(&mut [0; 12]).unwrap());

        // 16 bytes are free but only 4 are contiguous
        let grant = queue.try_claim_write(16).unwrap();
        assert_eq!(4, grant.len());
        drop(grant);

        queue.try_write_all(&[1, 2, 3, 4, 5, 6]).unwrap();
        let grant = queue.try_claim_read(16).unwrap();
        assert_eq!(&[1, 2, 3, 4], &*grant);
        grant.commit(4);
        let grant = queue.try_claim_read(16).unwrap();
        assert_eq!(&[5, 6], &*grant);
    }

    #[test]
    fn committing_nothing_is_a_no_op() {
        let queue = Queue::new();
        queue.try_write_all(&[9; 5]).unwrap();
        let before = queue.cursors();

        let mut grant = queue.try_claim_write(4).unwrap();
        grant.fill(0xAA);
        grant.commit(0);
        assert_eq!(before, queue.cursors());

        queue.try_claim_read(4).unwrap().commit(0);
        assert_eq!(before, queue.cursors());

        // dropping is the same as committing nothing
        drop(queue.try_claim_read(4).unwrap());
        assert_eq!(before, queue.cursors());

        let mut buf = [0; 5];
        queue.try_read(&mut buf).unwrap();
        assert_eq!([9; 5], buf, "Abandoned write must not leak into the data");
    }

    #[test]
    fn one_grant_per_side() {
        let queue = Queue::new();
        let write = queue.try_claim_write(1).unwrap();
        assert!(matches!(queue.try_claim_write(1), Err(QueueError::Busy)));
        assert_eq!(Err(QueueError::Busy), queue.try_write_all(&[1]));

        // the other side is unaffected
        let read = queue.try_claim_read(1).unwrap();
        assert!(matches!(queue.try_claim_read(1), Err(QueueError::Busy)));

        drop(write);
        drop(read);
        assert!(queue.try_claim_write(1).is_ok());
        assert!(queue.try_claim_read(1).is_ok());
    }

    #[test]
    fn write_all_is_all_or_nothing() {
        let queue = Queue::new();
        queue.try_write_all(&[0; 14]).unwrap();
        assert_eq!(Err(QueueError::Full), queue.try_write_all(&[1, 2, 3]));
        assert_eq!(14, queue.occupied());
    }

    #[test]
    fn fifo_across_wraparound() {
        let queue = Queue::new();
        let mut expected = 0_u8;
        let mut next = 0_u8;
        for round in 0..50 {
            let chunk: [u8; 5] = core::array::from_fn(|i| next.wrapping_add(i as u8));
            queue.try_write_all(&chunk).unwrap();
            next = next.wrapping_add(5);

            let mut buf = [0; 7];
            let n = queue.try_read(&mut buf[..(round % 7) + 1]).unwrap();
            for &b in &buf[..n] {
                assert_eq!(expected, b, "Bytes must come out in the order they went in");
                expected = expected.wrapping_add(1);
            }
            // keep the queue from filling up
            while queue.free() < 5 {
                let n = queue.try_read(&mut buf).unwrap();
                for &b in &buf[..n] {
                    assert_eq!(expected, b);
                    expected = expected.wrapping_add(1);
                }
            }
        }
    }

    #[test]
    fn no_wait_on_empty_queue_times_out() {
        let queue = Queue::new();
        block_on(async {
            assert_eq!(
                Err(QueueError::Timeout),
                queue.wait_readable(Timeout::NoWait).await
            );
            queue.try_write_all(&[1]).unwrap();
            assert_eq!(Ok(()), queue.wait_readable(Timeout::NoWait).await);
            assert_eq!(Ok(()), queue.wait_readable(Timeout::Forever).await);
        });
        assert_eq!(1, queue.occupied());
    }

    #[test]
    fn consumer_wakes_when_producer_commits() {
        static QUEUE: FlowQueue<CriticalSectionRawMutex, 8> = FlowQueue::new();

        let producer = async {
            for b in 0..=255_u8 {
                loop {
                    let mut grant = QUEUE.claim_write(1).await;
                    if grant.len() == 1 {
                        grant[0] = b;
                        grant.commit(1);
                        break;
                    }
                    drop(grant);
                    yield_now().await;
                }
            }
        };
        let consumer = async {
            let mut received = 0_usize;
            while received < 256 {
                QUEUE.wait_readable(Timeout::Forever).await.unwrap();
                let grant = QUEUE.claim_read(3).await;
                for &b in grant.iter() {
                    assert_eq!(received as u8, b);
                    received += 1;
                }
                let n = grant.len();
                grant.commit(n);
            }
        };
        block_on(join(producer, consumer));
        assert!(QUEUE.is_empty());
    }
}
