// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for safely interacting with caller memory.
//!
//! Every address that arrives in a trap argument is an _allegation_. Before
//! the manager touches it, `memory_check` confirms that the range lies wholly
//! inside one of the regions belonging to the caller's trust domain. The
//! copy helpers here run that check themselves and are the only code that
//! dereferences caller addresses.
//!
//! The check validates location only. The `Access` tag is carried through so
//! a platform with an MPU can enforce it, but nothing here does.

use core::marker::PhantomData;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use abi::IpcError;

/// A (caller-supplied, untrusted) slice.
///
/// Having a `USlice<T>` tells you the following:
///
/// - Some caller has claimed it has access to a section of address space
///   (delimited by the `USlice`).
/// - The base of the section is correctly aligned for type `T`.
/// - The section does not wrap around the end of the address space.
///
/// It does _not_ tell you the caller may touch that memory; that's what
/// `memory_check` is for.
pub struct USlice<T> {
    /// Base address of the slice.
    base_address: usize,
    /// Number of `T` elements in the slice.
    length: usize,
    /// since we don't actually use T...
    _marker: PhantomData<*mut [T]>,
}

impl<T> USlice<T> {
    /// Constructs a `USlice` given a base address and length passed from
    /// untrusted code.
    ///
    /// This will only succeed if such a slice would not wrap past the top of
    /// the address space, and if `base_address` is correctly aligned for `T`.
    pub fn from_raw(
        base_address: usize,
        length: usize,
    ) -> Result<Self, IpcError> {
        // NOTE: the properties checked here are critical for the correctness of
        // this type. Think carefully before loosening any of them, or adding a
        // second way to construct a USlice.
        const { assert!(core::mem::size_of::<T>() != 0) };

        if base_address % core::mem::align_of::<T>() != 0 {
            return Err(IpcError::MemoryCheck);
        }
        let size_in_bytes = length
            .checked_mul(core::mem::size_of::<T>())
            .ok_or(IpcError::MemoryCheck)?;
        // Note: this subtraction cannot underflow. You can subtract any usize
        // from usize::MAX.
        if base_address <= usize::MAX - size_in_bytes {
            Ok(Self {
                base_address,
                length,
                _marker: PhantomData,
            })
        } else {
            Err(IpcError::MemoryCheck)
        }
    }

    /// Returns `true` if this slice is zero-length, `false` otherwise.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the number of `T`s in this slice.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns the bottom address of this slice as a `usize`.
    pub fn base_addr(&self) -> usize {
        self.base_address
    }

    /// Returns the end address of the slice, which is the address one past its
    /// final byte -- or its base address if it's empty.
    pub fn end_addr(&self) -> usize {
        // Checked at construction.
        let size_in_bytes = self.length.wrapping_mul(core::mem::size_of::<T>());
        self.base_address.wrapping_add(size_in_bytes)
    }
}

impl<T> USlice<T>
where
    T: FromBytes + Immutable + KnownLayout,
{
    /// Converts this into an _actual_ slice that can be directly read.
    ///
    /// # Safety
    ///
    /// This operation is totally unchecked, so to use it safely, you must first
    /// convince yourself of the following.
    ///
    /// 1. That the memory region this `USlice` describes is actual memory.
    /// 2. That this memory is legally readable by whoever you're doing work
    ///    on behalf of.
    /// 3. That it does not alias any slice you intend to `&mut`-reference with
    ///    `assume_writable`, or any manager memory.
    /// 4. That it is non-empty, or its base is non-null.
    pub unsafe fn assume_readable(&self) -> &[T] {
        // Safety: this function's contract ensures that the slice we produce
        // here is valid.
        unsafe {
            core::slice::from_raw_parts(
                self.base_address as *const T,
                self.length,
            )
        }
    }

    /// Converts this into an _actual_ slice that can be directly read and
    /// written.
    ///
    /// # Safety
    ///
    /// As for `assume_readable`, with "readable" replaced by "writable", and
    /// the slice must not alias any other slice you intend to access.
    pub unsafe fn assume_writable(&mut self) -> &mut [T] {
        // Safety: this function's contract ensures that the slice we produce
        // here is valid.
        unsafe {
            core::slice::from_raw_parts_mut(
                self.base_address as *mut T,
                self.length,
            )
        }
    }
}

impl<T> Clone for USlice<T> {
    fn clone(&self) -> Self {
        Self {
            base_address: self.base_address,
            length: self.length,
            _marker: PhantomData,
        }
    }
}

/// Can't `derive(Debug)` for `USlice` because that puts a `Debug` requirement
/// on `T`, and that's silly.
impl<T> core::fmt::Debug for USlice<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("USlice")
            .field("base_address", &self.base_address)
            .field("length", &self.length)
            .finish()
    }
}

/// Compatibility with the generic portable algorithms in `kerncore`.
impl<T> kerncore::UserSlice for USlice<T> {
    fn is_empty(&self) -> bool {
        self.is_empty()
    }

    fn base_addr(&self) -> usize {
        self.base_addr()
    }

    fn end_addr(&self) -> usize {
        self.end_addr()
    }
}

/// What the caller intends to do with a buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// Who a buffer is being checked on behalf of.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Domain {
    /// The caller trapped from the non-secure world.
    pub non_secure: bool,
    /// The caller runs privileged. Recorded for MPU-backed platforms.
    pub privileged: bool,
}

impl Domain {
    /// The domain of a secure partition.
    pub const fn secure(privileged: bool) -> Self {
        Self {
            non_secure: false,
            privileged,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegionName {
    NsData,
    NsCode,
    Heap,
    DataRw,
    DataZi,
    Stack,
    Scratch,
    Code,
}

/// A named span of the address space with an inclusive `limit`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Region {
    pub name: RegionName,
    pub base: usize,
    pub limit: usize,
}

impl Region {
    /// A region that contains nothing.
    pub const fn empty(name: RegionName) -> Self {
        Self {
            name,
            base: 1,
            limit: 0,
        }
    }

    /// Builds a region from a base and a one-past-the-end address, which is
    /// how linker scripts describe them.
    pub const fn from_bounds(name: RegionName, base: usize, end: usize) -> Self {
        if end <= base {
            Self::empty(name)
        } else {
            Self {
                name,
                base,
                limit: end - 1,
            }
        }
    }
}

impl kerncore::MemoryRegion for Region {
    fn base_addr(&self) -> usize {
        self.base
    }

    fn last_addr(&self) -> usize {
        self.limit
    }
}

/// The regions each trust domain may hand us, in the order they're tried.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemoryMap {
    /// Non-secure data, then non-secure code.
    pub non_secure: [Region; 2],
    /// Heap, RW data, ZI data, secure stack, unprivileged scratch, then
    /// secure code.
    pub secure: [Region; 6],
}

impl MemoryMap {
    pub const EMPTY: Self = Self {
        non_secure: [
            Region::empty(RegionName::NsData),
            Region::empty(RegionName::NsCode),
        ],
        secure: [
            Region::empty(RegionName::Heap),
            Region::empty(RegionName::DataRw),
            Region::empty(RegionName::DataZi),
            Region::empty(RegionName::Stack),
            Region::empty(RegionName::Scratch),
            Region::empty(RegionName::Code),
        ],
    };

    /// Returns a copy of this map with region `name` spanning `base..=limit`.
    pub fn with(mut self, name: RegionName, base: usize, limit: usize) -> Self {
        let slot = self
            .non_secure
            .iter_mut()
            .chain(self.secure.iter_mut())
            .find(|r| r.name == name);
        if let Some(r) = slot {
            r.base = base;
            r.limit = limit;
        }
        self
    }

    fn table(&self, domain: Domain) -> &[Region] {
        if domain.non_secure {
            &self.non_secure
        } else {
            &self.secure
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    None,
    Rejected { base: usize, len: usize, ns: bool },
}

ringbuf::ringbuf!(Trace, 8, Trace::None);

/// Checks that `len` bytes at `buffer` lie inside one region of `domain`.
///
/// A zero-length buffer always passes, whatever its address. A null buffer
/// with a non-zero length is `BadParameters`; a range that wraps or lands
/// outside every region is `MemoryCheck`.
pub fn memory_check(
    map: &MemoryMap,
    buffer: usize,
    len: usize,
    domain: Domain,
    _access: Access,
) -> Result<(), IpcError> {
    if len == 0 {
        return Ok(());
    }
    if buffer == 0 {
        return Err(IpcError::BadParameters);
    }
    let slice = USlice::<u8>::from_raw(buffer, len)?;
    match kerncore::containing_region(&slice, map.table(domain)) {
        Some(_) => Ok(()),
        None => {
            ringbuf::ringbuf_entry!(Trace::Rejected {
                base: buffer,
                len,
                ns: domain.non_secure,
            });
            Err(IpcError::MemoryCheck)
        }
    }
}

/// Reads `dest.len()` `T`s out of caller memory at `base`.
pub fn copy_from_caller<T>(
    map: &MemoryMap,
    base: usize,
    dest: &mut [T],
    domain: Domain,
) -> Result<(), IpcError>
where
    T: FromBytes + Immutable + KnownLayout + Copy,
{
    if dest.is_empty() {
        return Ok(());
    }
    let slice = USlice::<T>::from_raw(base, dest.len())?;
    memory_check(
        map,
        base,
        slice.end_addr() - base,
        domain,
        Access::ReadOnly,
    )?;
    // Safety: the range is aligned, non-null, and lies inside a region of the
    // caller's domain, which the platform guarantees is real memory disjoint
    // from manager state.
    dest.copy_from_slice(unsafe { slice.assume_readable() });
    Ok(())
}

/// Writes `src` into caller memory at `base`.
pub fn copy_to_caller<T>(
    map: &MemoryMap,
    base: usize,
    src: &[T],
    domain: Domain,
) -> Result<(), IpcError>
where
    T: FromBytes + Immutable + KnownLayout + Copy,
{
    if src.is_empty() {
        return Ok(());
    }
    let mut slice = USlice::<T>::from_raw(base, src.len())?;
    memory_check(
        map,
        base,
        slice.end_addr() - base,
        domain,
        Access::ReadWrite,
    )?;
    // Safety: as in `copy_from_caller`.
    unsafe { slice.assume_writable() }.copy_from_slice(src);
    Ok(())
}

/// Copies `len` bytes between two caller buffers, each checked against its
/// own domain. The buffers may overlap.
pub fn copy_between(
    map: &MemoryMap,
    from: usize,
    from_domain: Domain,
    to: usize,
    to_domain: Domain,
    len: usize,
) -> Result<(), IpcError> {
    if len == 0 {
        return Ok(());
    }
    memory_check(map, from, len, from_domain, Access::ReadOnly)?;
    memory_check(map, to, len, to_domain, Access::ReadWrite)?;
    // Safety: both ranges are non-null, don't wrap, and lie inside regions
    // of their owners' domains. `copy` tolerates overlap.
    unsafe {
        core::ptr::copy(from as *const u8, to as *mut u8, len);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NS: Domain = Domain {
        non_secure: true,
        privileged: false,
    };
    const S: Domain = Domain::secure(true);

    fn map() -> MemoryMap {
        MemoryMap::EMPTY
            .with(RegionName::NsData, 0x2000_0000, 0x2000_FFFF)
            .with(RegionName::Heap, 0x3000_0000, 0x3000_0FFF)
            .with(RegionName::DataRw, 0x3000_1000, 0x3000_1FFF)
    }

    #[test]
    fn zero_length_always_passes() {
        let m = map();
        for addr in [0, 1, usize::MAX, 0x3000_0000] {
            assert_eq!(memory_check(&m, addr, 0, NS, Access::ReadOnly), Ok(()));
            assert_eq!(memory_check(&m, addr, 0, S, Access::ReadWrite), Ok(()));
        }
    }

    #[test]
    fn null_with_length_is_bad_parameters() {
        assert_eq!(
            memory_check(&map(), 0, 4, S, Access::ReadOnly),
            Err(IpcError::BadParameters)
        );
    }

    #[test]
    fn wrapping_range_is_rejected() {
        assert_eq!(
            memory_check(&map(), usize::MAX - 3, 8, S, Access::ReadOnly),
            Err(IpcError::MemoryCheck)
        );
    }

    #[test]
    fn domains_see_only_their_regions() {
        let m = map();
        assert_eq!(
            memory_check(&m, 0x2000_0100, 16, NS, Access::ReadOnly),
            Ok(())
        );
        assert_eq!(
            memory_check(&m, 0x2000_0100, 16, S, Access::ReadOnly),
            Err(IpcError::MemoryCheck)
        );
        assert_eq!(
            memory_check(&m, 0x3000_0100, 16, NS, Access::ReadOnly),
            Err(IpcError::MemoryCheck)
        );
    }

    #[test]
    fn straddling_adjacent_regions_fails() {
        // Heap and RW data touch at 0x3000_1000, but a buffer may not span
        // both.
        assert_eq!(
            memory_check(&map(), 0x3000_0FF0, 0x20, S, Access::ReadWrite),
            Err(IpcError::MemoryCheck)
        );
        assert_eq!(
            memory_check(&map(), 0x3000_0FF0, 0x10, S, Access::ReadWrite),
            Ok(())
        );
    }

    #[test]
    fn linker_bounds_become_inclusive() {
        let r = Region::from_bounds(RegionName::Code, 0x100, 0x200);
        assert_eq!((r.base, r.limit), (0x100, 0x1FF));
        let e = Region::from_bounds(RegionName::Code, 0x100, 0x100);
        assert!(e.base > e.limit);
    }

    #[test]
    fn copies_round_trip_through_real_memory() {
        let mut backing = vec![0u8; 64];
        let base = backing.as_mut_ptr() as usize;
        let m = MemoryMap::EMPTY.with(RegionName::Heap, base, base + 63);

        copy_to_caller(&m, base, b"abcdefgh", S).unwrap();
        copy_between(&m, base, S, base + 16, S, 8).unwrap();
        let mut out = [0u8; 8];
        copy_from_caller(&m, base + 16, &mut out, S).unwrap();
        assert_eq!(&out, b"abcdefgh");

        // One byte past the end of the region.
        assert_eq!(
            copy_from_caller(&m, base + 60, &mut out, S),
            Err(IpcError::MemoryCheck)
        );
    }

    proptest! {
        #[test]
        fn inside_single_region_passes(off in 0usize..0x1000, len in 1usize..0x1000) {
            let m = map();
            let res = memory_check(&m, 0x3000_0000 + off, len, S, Access::ReadOnly);
            if off + len <= 0x1000 {
                prop_assert_eq!(res, Ok(()));
            } else {
                prop_assert_eq!(res, Err(IpcError::MemoryCheck));
            }
        }

        #[test]
        fn empty_requests_ignore_the_address(addr in any::<usize>()) {
            prop_assert_eq!(memory_check(&map(), addr, 0, NS, Access::ReadWrite), Ok(()));
        }
    }
}
