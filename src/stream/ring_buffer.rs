//! Lock-free single-producer single-consumer ring buffer
//!
//! Carries resampled samples from the source thread (producer) to the
//! transmit thread (consumer). All memory is allocated up front; `write` and
//! `read` never block, the caller decides how to wait.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

/// SPSC ring buffer.
///
/// `write_pos` and `read_pos` live on separate cache lines. Positions grow
/// monotonically (wrapping) and are masked on access, so `capacity` must be
/// a power of two.
pub struct RingBuffer<T: Copy + Default> {
    buffer: Box<[UnsafeCell<T>]>,
    capacity: usize,
    mask: usize,

    write_pos: CachePadded<AtomicUsize>,
    read_pos: CachePadded<AtomicUsize>,

    memory_locked: AtomicBool,
}

unsafe impl<T: Copy + Default + Send> Send for RingBuffer<T> {}
unsafe impl<T: Copy + Default + Send> Sync for RingBuffer<T> {}

impl<T: Copy + Default> RingBuffer<T> {
    /// `capacity` must be a power of two
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be power of two");

        let buffer: Vec<UnsafeCell<T>> = (0..capacity)
            .map(|_| UnsafeCell::new(T::default()))
            .collect();

        Self {
            buffer: buffer.into_boxed_slice(),
            capacity,
            mask: capacity - 1,
            write_pos: CachePadded::new(AtomicUsize::new(0)),
            read_pos: CachePadded::new(AtomicUsize::new(0)),
            memory_locked: AtomicBool::new(false),
        }
    }

    /// Round `min_capacity` up to the next power of two
    pub fn with_min_capacity(min_capacity: usize) -> Self {
        Self::new(min_capacity.max(1).next_power_of_two())
    }

    /// Pin the storage in RAM so the transmit path never page-faults.
    ///
    /// Returns whether the memory is locked.
    pub fn lock_memory(&self) -> bool {
        if self.memory_locked.load(Ordering::Acquire) {
            return true;
        }

        let ptr = self.buffer.as_ptr() as *const libc::c_void;
        let len = self.capacity * std::mem::size_of::<UnsafeCell<T>>();

        if unsafe { libc::mlock(ptr, len) } == 0 {
            self.memory_locked.store(true, Ordering::Release);
            log::debug!("Ring buffer memory locked: {} bytes", len);
            true
        } else {
            log::warn!(
                "Failed to lock ring buffer memory: {}",
                std::io::Error::last_os_error()
            );
            false
        }
    }

    pub fn unlock_memory(&self) {
        if !self.memory_locked.swap(false, Ordering::AcqRel) {
            return;
        }

        let ptr = self.buffer.as_ptr() as *const libc::c_void;
        let len = self.capacity * std::mem::size_of::<UnsafeCell<T>>();
        unsafe {
            libc::munlock(ptr, len);
        }
        log::debug!("Ring buffer memory unlocked");
    }

    /// Copy `data` in at `pos`, wrapping at the end of storage.
    ///
    /// Caller owns the range `[pos, pos + data.len())`.
    #[inline]
    unsafe fn copy_in(&self, pos: usize, data: &[T]) {
        let start = pos & self.mask;
        let first = data.len().min(self.capacity - start);
        let base = self.buffer.as_ptr() as *mut T;
        std::ptr::copy_nonoverlapping(data.as_ptr(), base.add(start), first);
        std::ptr::copy_nonoverlapping(data.as_ptr().add(first), base, data.len() - first);
    }

    #[inline]
    unsafe fn copy_out(&self, pos: usize, output: &mut [T]) {
        let start = pos & self.mask;
        let first = output.len().min(self.capacity - start);
        let base = self.buffer.as_ptr() as *const T;
        std::ptr::copy_nonoverlapping(base.add(start), output.as_mut_ptr(), first);
        std::ptr::copy_nonoverlapping(base, output.as_mut_ptr().add(first), output.len() - first);
    }

    /// Producer side. Writes as much of `data` as fits and returns the count.
    #[inline]
    pub fn write(&self, data: &[T]) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);

        let used = write.wrapping_sub(read);
        debug_assert!(used <= self.capacity, "ring buffer invariant violated: used > capacity");

        let to_write = data.len().min(self.capacity - used);
        unsafe {
            self.copy_in(write, &data[..to_write]);
        }

        self.write_pos
            .store(write.wrapping_add(to_write), Ordering::Release);
        to_write
    }

    /// Consumer side. Fills as much of `output` as is available and returns the count.
    #[inline]
    pub fn read(&self, output: &mut [T]) -> usize {
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);

        let to_read = output.len().min(write.wrapping_sub(read));
        unsafe {
            self.copy_out(read, &mut output[..to_read]);
        }

        self.read_pos
            .store(read.wrapping_add(to_read), Ordering::Release);
        to_read
    }

    /// Samples ready to read
    #[inline]
    pub fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity - self.available()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn fill_ratio(&self) -> f64 {
        self.available() as f64 / self.capacity as f64
    }

    /// Drop everything not yet read. Only call while the producer is idle.
    pub fn clear(&self) {
        let write = self.write_pos.load(Ordering::Acquire);
        self.read_pos.store(write, Ordering::Release);
    }
}

impl<T: Copy + Default> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        self.unlock_memory();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::ComplexSample;
    use std::sync::Arc;

    #[test]
    fn test_ring_buffer_basic() {
        let rb = RingBuffer::<i32>::new(16);

        let data = [1, 2, 3, 4];
        assert_eq!(rb.write(&data), 4);
        assert_eq!(rb.available(), 4);

        let mut output = [0i32; 4];
        assert_eq!(rb.read(&mut output), 4);
        assert_eq!(output, data);
        assert!(rb.is_empty());
    }

    #[test]
    fn test_ring_buffer_wrap() {
        let rb = RingBuffer::<i32>::new(4);
        assert_eq!(rb.write(&[1, 2, 3, 4]), 4);

        let mut output = [0i32; 3];
        assert_eq!(rb.read(&mut output), 3);
        assert_eq!(output, [1, 2, 3]);

        // wraps across the end of storage
        assert_eq!(rb.write(&[5, 6, 7]), 3);

        let mut all = [0i32; 4];
        assert_eq!(rb.read(&mut all), 4);
        assert_eq!(all, [4, 5, 6, 7]);
    }

    #[test]
    fn test_ring_buffer_full_and_empty() {
        let rb = RingBuffer::<i32>::new(4);
        assert_eq!(rb.write(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(rb.free_space(), 0);
        assert_eq!(rb.write(&[7]), 0);

        rb.clear();
        let mut output = [0i32; 4];
        assert_eq!(rb.read(&mut output), 0);
    }

    #[test]
    fn test_min_capacity_rounds_up() {
        assert_eq!(RingBuffer::<i32>::with_min_capacity(1000).capacity(), 1024);
        assert_eq!(RingBuffer::<i32>::with_min_capacity(0).capacity(), 1);
    }

    #[test]
    fn test_cross_thread_order_preserved() {
        let rb = Arc::new(RingBuffer::<ComplexSample>::new(64));
        let total = 10_000usize;

        let producer = {
            let rb = Arc::clone(&rb);
            std::thread::spawn(move || {
                let data: Vec<ComplexSample> = (0..total)
                    .map(|i| ComplexSample::new(i as f32, -(i as f32)))
                    .collect();
                let mut sent = 0;
                while sent < total {
                    let end = (sent + 37).min(total);
                    sent += rb.write(&data[sent..end]);
                    std::thread::yield_now();
                }
            })
        };

        let mut received = Vec::with_capacity(total);
        let mut chunk = [ComplexSample::default(); 29];
        while received.len() < total {
            let n = rb.read(&mut chunk);
            received.extend_from_slice(&chunk[..n]);
            if n == 0 {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();

        for (i, s) in received.iter().enumerate() {
            assert_eq!(*s, ComplexSample::new(i as f32, -(i as f32)));
        }
    }
}
