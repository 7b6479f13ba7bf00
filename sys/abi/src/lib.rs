// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SPM ABI definitions, shared between the partition manager, the secure
//! partitions, and the non-secure client library.
//!
//! Everything in here crosses the trap boundary or is baked into the image
//! by the build, so the numeric values are part of the ABI and must not move.

#![no_std]

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Version of the PSA Firmware Framework implemented, as reported by
/// `psa_framework_version`.
pub const PSA_FRAMEWORK_VERSION: u32 = 0x0100;

/// Version reported for a service that does not exist or is not visible to
/// the caller.
pub const PSA_VERSION_NONE: u32 = 0;

/// Handle value meaning "no connection".
pub const PSA_NULL_HANDLE: i32 = 0;

/// Maximum number of input plus output vectors in a single call.
pub const PSA_MAX_IOVEC: usize = 4;

/// Timeout argument to `psa_wait` that blocks until a signal arrives.
pub const PSA_BLOCK: u32 = 0x8000_0000;
/// Timeout argument to `psa_wait` that returns immediately.
pub const PSA_POLL: u32 = 0x0000_0000;
/// Bits of the `psa_wait` timeout argument that are interpreted.
pub const PSA_TIMEOUT_MASK: u32 = PSA_BLOCK;

/// Signal bit asserted by `psa_notify` and consumed by `psa_clear`.
pub const PSA_DOORBELL: u32 = 0x0000_0008;

/// Message type of a connection request.
pub const PSA_IPC_CONNECT: i32 = -1;
/// Message type of a regular call. Any non-negative type is a call.
pub const PSA_IPC_CALL: i32 = 0;
/// Message type of a disconnection request.
pub const PSA_IPC_DISCONNECT: i32 = -2;

/// Client ID used when no non-secure client context has been loaded.
pub const DEFAULT_NS_CLIENT_ID: i32 = -1;

pub const PSA_SUCCESS: i32 = 0;
pub const PSA_ERROR_PROGRAMMER_ERROR: i32 = -129;
pub const PSA_ERROR_CONNECTION_REFUSED: i32 = -130;
pub const PSA_ERROR_CONNECTION_BUSY: i32 = -131;
pub const PSA_ERROR_GENERIC_ERROR: i32 = -132;
pub const PSA_ERROR_NOT_PERMITTED: i32 = -133;
pub const PSA_ERROR_NOT_SUPPORTED: i32 = -134;
pub const PSA_ERROR_INVALID_ARGUMENT: i32 = -135;
pub const PSA_ERROR_INVALID_HANDLE: i32 = -136;
pub const PSA_ERROR_BAD_STATE: i32 = -137;
pub const PSA_ERROR_BUFFER_TOO_SMALL: i32 = -138;
pub const PSA_ERROR_ALREADY_EXISTS: i32 = -139;
pub const PSA_ERROR_DOES_NOT_EXIST: i32 = -140;
pub const PSA_ERROR_INSUFFICIENT_MEMORY: i32 = -141;

/// PSA status codes that the partition manager itself produces or
/// interprets.
///
/// Services may reply with any `i32`; this enum only names the ones that have
/// meaning to the manager.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum PsaStatus {
    Success = PSA_SUCCESS,
    ProgrammerError = PSA_ERROR_PROGRAMMER_ERROR,
    ConnectionRefused = PSA_ERROR_CONNECTION_REFUSED,
    ConnectionBusy = PSA_ERROR_CONNECTION_BUSY,
    GenericError = PSA_ERROR_GENERIC_ERROR,
    NotPermitted = PSA_ERROR_NOT_PERMITTED,
    NotSupported = PSA_ERROR_NOT_SUPPORTED,
    InvalidArgument = PSA_ERROR_INVALID_ARGUMENT,
    InvalidHandle = PSA_ERROR_INVALID_HANDLE,
    BadState = PSA_ERROR_BAD_STATE,
    BufferTooSmall = PSA_ERROR_BUFFER_TOO_SMALL,
    AlreadyExists = PSA_ERROR_ALREADY_EXISTS,
    DoesNotExist = PSA_ERROR_DOES_NOT_EXIST,
    InsufficientMemory = PSA_ERROR_INSUFFICIENT_MEMORY,
}

impl PsaStatus {
    /// Raw value of this status, as it appears in `r0`.
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl core::convert::TryFrom<i32> for PsaStatus {
    type Error = i32;

    fn try_from(x: i32) -> Result<Self, Self::Error> {
        match x {
            PSA_SUCCESS => Ok(Self::Success),
            PSA_ERROR_PROGRAMMER_ERROR => Ok(Self::ProgrammerError),
            PSA_ERROR_CONNECTION_REFUSED => Ok(Self::ConnectionRefused),
            PSA_ERROR_CONNECTION_BUSY => Ok(Self::ConnectionBusy),
            PSA_ERROR_GENERIC_ERROR => Ok(Self::GenericError),
            PSA_ERROR_NOT_PERMITTED => Ok(Self::NotPermitted),
            PSA_ERROR_NOT_SUPPORTED => Ok(Self::NotSupported),
            PSA_ERROR_INVALID_ARGUMENT => Ok(Self::InvalidArgument),
            PSA_ERROR_INVALID_HANDLE => Ok(Self::InvalidHandle),
            PSA_ERROR_BAD_STATE => Ok(Self::BadState),
            PSA_ERROR_BUFFER_TOO_SMALL => Ok(Self::BufferTooSmall),
            PSA_ERROR_ALREADY_EXISTS => Ok(Self::AlreadyExists),
            PSA_ERROR_DOES_NOT_EXIST => Ok(Self::DoesNotExist),
            PSA_ERROR_INSUFFICIENT_MEMORY => Ok(Self::InsufficientMemory),
            _ => Err(x),
        }
    }
}

/// Internal error codes used between SPM components.
///
/// These never reach a client; they live in the `i32::MIN` neighborhood so
/// they can't be confused with a PSA status if one leaks into a register.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum IpcError {
    BadParameters = i32::MIN,
    ShortBuffer = i32::MIN + 1,
    Version = i32::MIN + 2,
    MemoryCheck = i32::MIN + 3,
    Generic = i32::MIN + 0x1F,
}

/// How a service compares its minor version against the one a client asks
/// for.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u32)]
pub enum VersionPolicy {
    /// The client may ask for any version up to the service's.
    Relaxed = 0,
    /// The client must ask for exactly the service's version.
    Strict = 1,
}

impl core::convert::TryFrom<u32> for VersionPolicy {
    type Error = u32;

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            0 => Ok(Self::Relaxed),
            1 => Ok(Self::Strict),
            _ => Err(x),
        }
    }
}

/// Scheduling priority word of a thread.
///
/// The low byte is the priority proper: numerically lower values are more
/// important. Bit 16 marks the thread that runs the non-secure world.
///
/// Note that this type *deliberately* does not implement `PartialOrd`/`Ord`, to
/// keep us from confusing ourselves on whether `>` means numerically greater /
/// less important, or more important / numerically smaller.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Default,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Serialize,
    Deserialize,
)]
#[repr(transparent)]
pub struct Priority(pub u32);

impl Priority {
    pub const HIGHEST: Self = Self(0x00);
    pub const HIGH: Self = Self(0x0F);
    pub const MEDIUM: Self = Self(0x1F);
    pub const LOW: Self = Self(0x7F);
    pub const LOWEST: Self = Self(0xFF);

    const LEVEL_MASK: u32 = 0xFF;
    const NON_SECURE: u32 = 1 << 16;

    /// Priority of the thread hosting the non-secure world.
    pub const NS_THREAD: Self = Self(Self::LOWEST.0 | Self::NON_SECURE);

    /// Numeric level, with attribute bits stripped.
    pub const fn level(self) -> u32 {
        self.0 & Self::LEVEL_MASK
    }

    /// Checks whether this priority word carries the non-secure attribute.
    pub const fn is_non_secure(self) -> bool {
        self.0 & Self::NON_SECURE != 0
    }

    /// Checks if `self` is strictly more important than `other`.
    ///
    /// This is easier to read than comparing the numeric values of the
    /// priorities, since lower numbers are more important.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.level() < other.level()
    }
}

bitflags::bitflags! {
    /// Properties of a partition fixed at build time.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
    #[repr(transparent)]
    pub struct PartitionFlags: u32 {
        /// Partition uses the IPC model and has a thread.
        const IPC = 1 << 0;
        /// Partition belongs to the PSA root of trust and runs privileged.
        const PSA_ROT = 1 << 1;
        /// Partition belongs to the application root of trust.
        const APP_ROT = 1 << 2;
        /// Partition hosts the non-secure world.
        const NON_SECURE = 1 << 3;
    }
}

impl PartitionFlags {
    /// Partitions in the PSA root of trust run privileged; everyone else
    /// doesn't.
    pub fn is_privileged(self) -> bool {
        self.contains(Self::PSA_ROT)
    }
}

/// Record describing a single partition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionDesc {
    /// Partition ID. Doubles as the client ID of requests this partition
    /// makes, so it is positive for secure partitions.
    pub id: i32,
    pub flags: PartitionFlags,
    pub priority: Priority,
    /// Address of the partition thread's entry point.
    pub entry_point: usize,
    /// Argument handed to the entry point in `r0`.
    pub entry_arg: usize,
    /// Lowest address of the thread's stack; also its stack limit.
    pub stack_base: usize,
    /// Initial stack pointer, one past the highest stack address.
    pub stack_top: usize,
}

/// Record describing a single RoT service.
#[derive(Clone, Debug)]
pub struct ServiceDesc {
    pub name: &'static str,
    /// Partition that hosts this service.
    pub partition_id: i32,
    /// Signal bit asserted on the hosting partition when a message arrives.
    pub signal: u32,
    /// Service ID, as used by clients to connect.
    pub sid: u32,
    /// Whether non-secure clients may connect.
    pub non_secure_clients: bool,
    pub minor_version: u32,
    /// Raw `VersionPolicy` value. Kept raw so a malformed table is caught at
    /// connection time rather than silently coerced.
    pub version_policy: u32,
}

/// Record binding an interrupt line to a partition signal.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct IrqDesc {
    /// Which interrupt line is being hooked.
    pub irq: u32,
    /// Partition that handles it.
    pub partition_id: i32,
    /// Signal bit asserted when the interrupt fires.
    pub signal: u32,
}

/// One input vector, as laid out in client memory.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct PsaInvec {
    pub base: usize,
    pub len: usize,
}

/// One output vector, as laid out in client memory. `len` is updated with
/// the number of bytes written when the call completes.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct PsaOutvec {
    pub base: usize,
    pub len: usize,
}

/// Message descriptor handed to a service by `psa_get`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct PsaMsg {
    /// `PSA_IPC_CONNECT`, `PSA_IPC_DISCONNECT`, or a non-negative call type.
    pub msg_type: i32,
    /// Message handle the service uses for `psa_read`, `psa_reply` and
    /// friends.
    pub handle: i32,
    /// Client ID of the requester: positive for secure partitions, negative
    /// for non-secure clients.
    pub client_id: i32,
    /// Opaque value previously installed with `psa_set_rhandle`.
    pub rhandle: usize,
    pub in_size: [usize; PSA_MAX_IOVEC],
    pub out_size: [usize; PSA_MAX_IOVEC],
}

// Clients build vector arrays by hand, as `{ base, len }` word pairs.
const_assert_eq!(
    core::mem::size_of::<PsaInvec>(),
    2 * core::mem::size_of::<usize>()
);
const_assert_eq!(
    core::mem::size_of::<PsaOutvec>(),
    2 * core::mem::size_of::<usize>()
);

/// Enumeration of trap numbers.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Sysnum {
    Schedule = 7,
    ThreadExit = 8,
    FrameworkVersion = 9,
    Version = 10,
    Connect = 11,
    Call = 12,
    Close = 13,
    Wait = 14,
    Get = 15,
    SetRhandle = 16,
    Read = 17,
    Skip = 18,
    Write = 19,
    Reply = 20,
    Notify = 21,
    Clear = 22,
    Eoi = 23,
}

/// We're using an explicit `TryFrom` impl for `Sysnum` instead of
/// `FromPrimitive` because the SPM doesn't depend on `num-traits` and this
/// seems okay.
impl core::convert::TryFrom<u32> for Sysnum {
    type Error = ();

    fn try_from(x: u32) -> Result<Self, Self::Error> {
        match x {
            7 => Ok(Self::Schedule),
            8 => Ok(Self::ThreadExit),
            9 => Ok(Self::FrameworkVersion),
            10 => Ok(Self::Version),
            11 => Ok(Self::Connect),
            12 => Ok(Self::Call),
            13 => Ok(Self::Close),
            14 => Ok(Self::Wait),
            15 => Ok(Self::Get),
            16 => Ok(Self::SetRhandle),
            17 => Ok(Self::Read),
            18 => Ok(Self::Skip),
            19 => Ok(Self::Write),
            20 => Ok(Self::Reply),
            21 => Ok(Self::Notify),
            22 => Ok(Self::Clear),
            23 => Ok(Self::Eoi),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::TryFrom;

    #[test]
    fn sysnum_rejects_legacy_and_unknown_numbers() {
        for n in 0..7 {
            assert_eq!(Sysnum::try_from(n), Err(()));
        }
        assert_eq!(Sysnum::try_from(24), Err(()));
        assert_eq!(Sysnum::try_from(u32::MAX), Err(()));
    }

    #[test]
    fn sysnum_matches_discriminants() {
        for n in 7..=23 {
            let s = Sysnum::try_from(n).unwrap();
            assert_eq!(s as u32, n);
        }
    }

    #[test]
    fn priority_ignores_attribute_bits() {
        assert!(Priority::HIGH.is_more_important_than(Priority::NS_THREAD));
        assert!(!Priority::NS_THREAD.is_more_important_than(Priority::LOWEST));
        assert!(!Priority::LOWEST.is_more_important_than(Priority::NS_THREAD));
        assert!(Priority::NS_THREAD.is_non_secure());
        assert!(!Priority::HIGHEST.is_non_secure());
    }

    #[test]
    fn ipc_errors_sit_at_the_bottom_of_the_range() {
        assert_eq!(IpcError::BadParameters as i32, i32::MIN);
        assert_eq!(IpcError::ShortBuffer as i32, i32::MIN + 1);
        assert_eq!(IpcError::Version as i32, i32::MIN + 2);
        assert_eq!(IpcError::MemoryCheck as i32, i32::MIN + 3);
        assert_eq!(IpcError::Generic as i32, i32::MIN + 0x1F);
    }

    #[test]
    fn status_round_trips_known_codes_only() {
        assert_eq!(
            PsaStatus::try_from(PSA_ERROR_CONNECTION_BUSY),
            Ok(PsaStatus::ConnectionBusy)
        );
        assert_eq!(PsaStatus::try_from(7), Err(7));
        assert_eq!(PsaStatus::DoesNotExist.code(), -140);
    }
}
