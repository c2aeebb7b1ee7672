//! The sandboxed tape.
//!
//! Cells live in an anonymous private mapping flanked by danger zones, pages
//! with no access permission. Pointer arithmetic wraps, so any out-of-range
//! access lands on a protected page and traps into [`crate::fault`] instead
//! of touching foreign memory. Danger zones are sized from the largest cell
//! offset the current program uses and only ever grow.

use std::num::NonZeroUsize;

use nix::sys::mman::{mmap, mprotect, munmap, MapFlags, ProtFlags};
use nix::unistd::{sysconf, SysconfVar};

use crate::cell::Cell;
use crate::error::Error;
use crate::fault;

fn page_size() -> usize {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as usize,
        _ => 4096,
    }
}

fn round_up(len: usize, page: usize) -> usize {
    len.div_ceil(page) * page
}

/// A page-guarded cell array with the current data pointer.
pub struct Tape<T: Cell> {
    map: *mut libc::c_void,
    map_len: usize,
    /// Danger zone size in bytes, per side.
    danger: usize,
    cell_count: usize,
    ptr: *mut T,
}

impl<T: Cell> Tape<T> {
    /// Map a tape of `cell_count` cells (rounded up to whole pages) with one
    /// danger page on each side, and place the data pointer on `start_cell`.
    pub fn new(cell_count: usize, start_cell: usize) -> Result<Tape<T>, Error> {
        assert!(cell_count > 0 && start_cell < cell_count);
        let page = page_size();
        let data_len = round_up(cell_count * std::mem::size_of::<T>(), page);
        let cell_count = data_len / std::mem::size_of::<T>();
        let danger = page;
        let map_len = data_len + 2 * danger;

        let map = unsafe {
            mmap(
                None,
                NonZeroUsize::new(map_len).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
                0, /* fd */
                0, /* off */
            )?
        };

        // Publish before the danger pages lose their permissions.
        fault::set_active(map, map_len);
        unsafe {
            mprotect(map, danger, ProtFlags::PROT_NONE)?;
            mprotect(map.cast::<u8>().add(danger + data_len).cast(), danger, ProtFlags::PROT_NONE)?;
        }

        let cells = unsafe { map.cast::<u8>().add(danger).cast::<T>() };
        Ok(Tape {
            map,
            map_len,
            danger,
            cell_count,
            ptr: unsafe { cells.add(start_cell) },
        })
    }

    fn cells(&self) -> *mut T {
        unsafe { self.map.cast::<u8>().add(self.danger).cast::<T>() }
    }

    fn data_len(&self) -> usize {
        self.map_len - 2 * self.danger
    }

    /// Cell index of the data pointer. Meaningful while the pointer is in
    /// range; wrapping otherwise, like the pointer itself.
    pub fn index(&self) -> isize {
        let diff = (self.ptr as isize).wrapping_sub(self.cells() as isize);
        diff / std::mem::size_of::<T>() as isize
    }

    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    /// Danger zone size in bytes, per side.
    pub fn danger_bytes(&self) -> usize {
        self.danger
    }

    /// Ensure each danger zone covers `max_off` cells.
    ///
    /// Remaps the tape when the current zones are too small, copying the
    /// cells and preserving the data pointer's cell index. Zones never
    /// shrink.
    pub fn grow_danger_zone(&mut self, max_off: u64) -> Result<(), Error> {
        let need = (max_off as usize).saturating_mul(std::mem::size_of::<T>());
        if need <= self.danger {
            return Ok(());
        }
        let page = page_size();
        let danger = round_up(need, page);
        let data_len = self.data_len();
        let map_len = data_len + 2 * danger;

        let map = unsafe {
            mmap(
                None,
                NonZeroUsize::new(map_len).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
                0, /* fd */
                0, /* off */
            )?
        };
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.cells().cast::<u8>(),
                map.cast::<u8>().add(danger),
                data_len,
            );
        }

        let index = self.index();
        fault::set_active(map, map_len);
        unsafe {
            mprotect(map, danger, ProtFlags::PROT_NONE)?;
            mprotect(map.cast::<u8>().add(danger + data_len).cast(), danger, ProtFlags::PROT_NONE)?;
            munmap(self.map, self.map_len)?;
        }

        self.map = map;
        self.map_len = map_len;
        self.danger = danger;
        self.ptr = unsafe { map.cast::<u8>().add(danger).cast::<T>().offset(index) };
        Ok(())
    }

    /// Advance the data pointer by `n` cells, wrapping.
    pub fn move_by(&mut self, n: i64) {
        self.ptr = self.ptr.wrapping_offset(n as isize);
    }

    /// Read the cell at `off` relative to the data pointer.
    ///
    /// Volatile so an out-of-range access really performs the doomed load
    /// and traps in the danger zone.
    pub fn load(&self, off: i64) -> T {
        unsafe { std::ptr::read_volatile(self.ptr.wrapping_offset(off as isize)) }
    }

    /// Write the cell at `off` relative to the data pointer.
    pub fn store(&mut self, off: i64, value: T) {
        unsafe { std::ptr::write_volatile(self.ptr.wrapping_offset(off as isize), value) }
    }

    /// Whether the data pointer is inside the writable cell region.
    pub fn check_pointer(&self) -> bool {
        let cells = self.cells() as usize;
        let end = cells + self.cell_count * std::mem::size_of::<T>();
        (cells..end).contains(&(self.ptr as usize))
    }

    /// Current data pointer, handed to jit-compiled code.
    pub fn data_ptr(&self) -> *mut T {
        self.ptr
    }

    /// Adopt the data pointer returned by jit-compiled code.
    pub fn set_data_ptr(&mut self, ptr: *mut T) {
        self.ptr = ptr;
    }
}

impl<T: Cell> Drop for Tape<T> {
    fn drop(&mut self) {
        fault::clear_active_if(self.map);
        unsafe {
            let _ = munmap(self.map, self.map_len);
        }
    }
}
