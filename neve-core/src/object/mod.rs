//! Tagged in-memory representation of Neve objects.
//!
//! # Design of the object system
//!
//! Every heap object begins with an [object header][`ObjectHeader`]
//! which stores the object's tag and kind-specific metadata.
//! The tag selects one of the `#[repr(C)]` representation types
//! in the submodules of this module.
//! For each representation type there is a function that computes
//! the number of bytes to allocate for an object,
//! and a function that initializes the memory after allocation.
//!
//! ## Scalars
//!
//! Not every value is a heap object.
//! Small integers are encoded directly inside an [`ObjRef`]:
//! a reference whose least significant bit is set is a _scalar_
//! and carries its payload in the remaining bits.
//! Scalars are never dereferenced.
//! Heap objects are always allocated with [`OBJECT_ALIGN`] alignment,
//! so the least significant bit of a genuine address is always clear.
//!
//! ## Constructors
//!
//! Tags `0 ..= MAX_CTOR_TAG` are constructor tags.
//! A constructor object stores a fixed number of fields,
//! each of which is itself an [`ObjRef`] (scalar or pointer).
//! The field count is stored in [`ObjectHeader::other`].
//!
//! ## Reserved kinds
//!
//! Tags above [`MAX_CTOR_TAG`] are reserved for the built-in kinds:
//! arrays, scalar arrays, strings, big integers, thunks, tasks,
//! mutable cells, closures, and external objects.
//! The RESERVED tag never appears on a live heap object;
//! it marks the terminator record of a compacted region.

pub use self::{array::*, bigint::*, cell::*, ctor::*, string::*};

use std::{
    alloc::{Layout, alloc, dealloc, handle_alloc_error},
    fmt,
    mem::size_of,
};

mod array;
mod bigint;
mod cell;
mod ctor;
mod string;

/// Minimum alignment for objects.
///
/// Objects must be aligned to at least two bytes
/// so that the scalar bit can never appear in a genuine address.
/// We align to the word size so that word-sized fields
/// can be read directly at any object address.
pub const OBJECT_ALIGN: usize = 8;

/// Largest tag that denotes a constructor.
pub const MAX_CTOR_TAG: u8 = 243;

/// Tags of the built-in object kinds.
#[allow(missing_docs)]
pub mod tag
{
    pub const CLOSURE: u8      = 244;
    pub const ARRAY: u8        = 245;
    pub const SCALAR_ARRAY: u8 = 247;
    pub const STRING: u8       = 248;
    pub const BIGINT: u8       = 249;
    pub const THUNK: u8        = 250;
    pub const TASK: u8         = 251;
    pub const REF: u8          = 252;
    pub const EXTERNAL: u8     = 253;
    pub const RESERVED: u8     = 254;
}

/// Kind of object.
///
/// This tells you which of the representation types is in use.
/// The set of kinds is closed; all dispatch over kinds
/// is an exhaustive `match` over this enum.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind
{
    Ctor(u8),
    Array,
    ScalarArray,
    String,
    Bigint,
    Thunk,
    Task,
    Ref,
    Closure,
    External,
    Reserved,
}

impl Kind
{
    /// Decode a header tag.
    pub fn from_tag(t: u8) -> Self
    {
        match t {
            0 ..= MAX_CTOR_TAG => Kind::Ctor(t),
            tag::CLOSURE       => Kind::Closure,
            tag::ARRAY         => Kind::Array,
            tag::SCALAR_ARRAY  => Kind::ScalarArray,
            tag::STRING        => Kind::String,
            tag::BIGINT        => Kind::Bigint,
            tag::THUNK         => Kind::Thunk,
            tag::TASK          => Kind::Task,
            tag::REF           => Kind::Ref,
            tag::EXTERNAL      => Kind::External,
            _                  => Kind::Reserved,
        }
    }
}

/// Data at the start of each object.
///
/// Every representation type begins with a field of this type
/// and uses `#[repr(C)]` so that we can downcast from this type.
#[repr(C)]
pub struct ObjectHeader
{
    /// Reference count.
    ///
    /// Always zero for objects that live in a compacted region;
    /// such objects are owned by the region as a whole.
    pub rc: i32,

    /// Byte size of the object while resident in a compacted region.
    ///
    /// Only set for kinds whose size a header cannot otherwise describe;
    /// zero when the size does not fit or can be computed from counts.
    pub cs_sz: u16,

    /// Kind-specific metadata.
    ///
    /// Field count for constructors,
    /// element size for scalar arrays, zero otherwise.
    pub other: u8,

    /// The object's tag.
    pub tag: u8,
}

impl ObjectHeader
{
    /// Header for a freshly allocated heap object.
    pub fn new(t: u8, other: u8) -> Self
    {
        Self{rc: 1, cs_sz: 0, other, tag: t}
    }

    /// Header for an object resident in a compacted region.
    ///
    /// Region-resident objects carry no reference count.
    /// The byte size is recorded when it fits in the header.
    pub fn for_region(t: u8, other: u8, size: usize) -> Self
    {
        let cs_sz = u16::try_from(size).unwrap_or(0);
        Self{rc: 0, cs_sz, other, tag: t}
    }
}

/// Reference to an object, or a scalar.
///
/// This is the universal value representation of the runtime:
/// a single machine word that is either a scalar (odd word)
/// or a pointer to an [`ObjectHeader`] (even word).
/// While a graph is resident in a compacted region,
/// the same representation holds region-relative byte offsets instead,
/// which are even as well because objects are word-aligned.
///
/// Equality and hashing are by address, not by structure.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct ObjRef
{
    inner: *mut ObjectHeader,
}

impl ObjRef
{
    /// Encode an unsigned scalar.
    pub fn from_scalar(value: usize) -> Self
    {
        Self{inner: ((value << 1) | 1) as *mut ObjectHeader}
    }

    /// Create a reference from the address of an object.
    pub fn from_ptr(ptr: *mut ObjectHeader) -> Self
    {
        Self{inner: ptr}
    }

    /// Reinterpret a region-relative byte offset as a reference.
    ///
    /// The result must not be dereferenced until it has been
    /// rebased onto the region's buffer.
    pub fn from_offset(offset: usize) -> Self
    {
        Self{inner: offset as *mut ObjectHeader}
    }

    /// Whether this is a scalar rather than a pointer.
    pub fn is_scalar(self) -> bool
    {
        self.inner as usize & 1 == 1
    }

    /// Decode the payload of a scalar.
    pub fn scalar_value(self) -> usize
    {
        debug_assert!(self.is_scalar());
        self.inner as usize >> 1
    }

    /// The raw word, whichever of the three encodings it holds.
    pub fn raw(self) -> usize
    {
        self.inner as usize
    }

    /// The address of the referenced object.
    pub fn as_ptr(self) -> *mut ObjectHeader
    {
        debug_assert!(!self.is_scalar());
        self.inner
    }

    /// View the reference as a pointer to a representation type.
    ///
    /// # Safety
    ///
    /// The reference must point to a live object of the given type.
    pub unsafe fn deref<T>(self) -> *mut T
    {
        debug_assert!(!self.is_scalar());
        self.inner.cast()
    }

    /// The object's tag.
    ///
    /// # Safety
    ///
    /// The reference must point to a live object.
    pub unsafe fn tag(self) -> u8
    {
        (*self.inner).tag
    }

    /// The object's kind.
    ///
    /// # Safety
    ///
    /// The reference must point to a live object.
    pub unsafe fn kind(self) -> Kind
    {
        Kind::from_tag(self.tag())
    }
}

impl fmt::Debug for ObjRef
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        if self.is_scalar() {
            write!(f, "Scalar({})", self.scalar_value())
        } else {
            write!(f, "ObjRef({:p})", self.inner)
        }
    }
}

/// Compute the byte footprint of a live heap object.
///
/// # Safety
///
/// The reference must point to a live object.
pub unsafe fn object_byte_size(o: ObjRef) -> usize
{
    match o.kind() {
        Kind::Ctor(..)    => ctor_size((*o.as_ptr()).other as usize),
        Kind::Array       => array_size((*o.deref::<Array>()).size),
        Kind::ScalarArray => {
            let sa = &*o.deref::<ScalarArray>();
            scalar_array_size(sa.elem_size(), sa.size)
        }
        Kind::String      => str_size((*o.deref::<Str>()).size),
        Kind::Bigint      => size_of::<Bigint>(),
        Kind::Thunk       => size_of::<Thunk>(),
        Kind::Task        => size_of::<Task>(),
        Kind::Ref         => size_of::<Ref>(),
        Kind::Closure
        | Kind::External  => unreachable!("unsized foreign object"),
        Kind::Reserved    => size_of::<Terminator>(),
    }
}

/// Allocate object-aligned memory for a heap object.
pub (crate) fn alloc_object(size: usize) -> *mut ObjectHeader
{
    let layout = Layout::from_size_align(size, OBJECT_ALIGN)
        .expect("Cannot allocate an object this large");

    // SAFETY: The layout has non-zero size; every kind has a header.
    let ptr = unsafe { alloc(layout) };
    if ptr.is_null() {
        handle_alloc_error(layout);
    }

    ptr.cast()
}

/// Release a heap object built by one of the `new_*` constructors.
///
/// This is shallow: objects referenced by the fields are not released.
/// Big integer objects have their digit storage dropped first.
///
/// # Safety
///
/// The reference must point to a live heap object
/// that was allocated by [`alloc_object`],
/// and must not be used afterwards.
pub unsafe fn dealloc_object(o: ObjRef)
{
    if let Kind::Bigint = o.kind() {
        bigint_drop_value(o.deref());
    }

    let size = object_byte_size(o);
    let layout = Layout::from_size_align_unchecked(size, OBJECT_ALIGN);
    dealloc(o.as_ptr().cast(), layout);
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::proptest};

    #[test]
    fn header_is_one_word()
    {
        assert_eq!(size_of::<ObjectHeader>(), size_of::<usize>());
    }

    #[test]
    fn kinds_decode_from_tags()
    {
        assert_eq!(Kind::from_tag(0), Kind::Ctor(0));
        assert_eq!(Kind::from_tag(MAX_CTOR_TAG), Kind::Ctor(MAX_CTOR_TAG));
        assert_eq!(Kind::from_tag(tag::ARRAY), Kind::Array);
        assert_eq!(Kind::from_tag(tag::RESERVED), Kind::Reserved);
        assert_eq!(Kind::from_tag(255), Kind::Reserved);
    }

    proptest!
    {
        #[test]
        fn scalars_round_trip(value in 0usize .. usize::MAX / 2)
        {
            let r = ObjRef::from_scalar(value);
            assert!(r.is_scalar());
            assert_eq!(r.scalar_value(), value);
        }

        #[test]
        fn scalars_are_odd(value in 0usize .. usize::MAX / 2)
        {
            assert_eq!(ObjRef::from_scalar(value).raw() & 1, 1);
        }
    }
}
