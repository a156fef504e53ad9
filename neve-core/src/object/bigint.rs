use {
    super::{OBJECT_ALIGN, ObjRef, ObjectHeader, alloc_object, tag},
    std::{mem::{ManuallyDrop, size_of}, ptr},
};

/// In-memory representation of arbitrary-precision integer objects.
///
/// The digit storage is owned by the value and lives outside the object.
/// Objects of this kind therefore need an explicit destruction step;
/// see [`bigint_drop_value`].
#[repr(C)]
pub struct Bigint
{
    pub (crate) header: ObjectHeader,

    /// The integer value.
    ///
    /// For an object resident in a compacted region this slot is
    /// uninitialized until the region has been read:
    /// the serialized decimal digits live past the end of the struct
    /// and are converted into this slot in place.
    pub value: ManuallyDrop<num_bigint::BigInt>,
}

/// Byte offset of the serialized digits within a region record.
///
/// Digits are placed on the first object-aligned boundary
/// after the value slot, so that the same spot can later
/// hold an aligned link pointer.
pub const BIGINT_TAIL: usize =
    (size_of::<Bigint>() + OBJECT_ALIGN - 1) & !(OBJECT_ALIGN - 1);

/// Byte footprint of a big integer object on the heap.
pub fn bigint_size() -> usize
{
    size_of::<Bigint>()
}

/// Create a new big integer object.
pub fn new_bigint(value: num_bigint::BigInt) -> ObjRef
{
    let ptr = alloc_object(bigint_size()).cast::<Bigint>();

    // SAFETY: The allocation is large enough for the struct.
    unsafe {
        let header = ObjectHeader::new(tag::BIGINT, 0);
        ptr::write(ptr, Bigint{header, value: ManuallyDrop::new(value)});
        ObjRef::from_ptr(ptr.cast())
    }
}

/// Drop the digit storage owned by a big integer object.
///
/// # Safety
///
/// The value slot must be initialized,
/// and must not be used afterwards.
pub unsafe fn bigint_drop_value(o: *mut Bigint)
{
    ManuallyDrop::drop(&mut (*o).value);
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::object::{Kind, dealloc_object},
        num_bigint::BigInt,
    };

    #[test]
    fn bigint_round_trip()
    {
        let expected = BigInt::parse_bytes(b"123456789012345678901234567890", 10)
            .unwrap();
        let o = new_bigint(expected.clone());

        unsafe {
            assert_eq!(o.kind(), Kind::Bigint);
            assert_eq!(*(*o.deref::<Bigint>()).value, expected);
            dealloc_object(o);
        }
    }

    #[test]
    fn tail_is_aligned()
    {
        assert_eq!(BIGINT_TAIL % OBJECT_ALIGN, 0);
        assert!(BIGINT_TAIL >= size_of::<Bigint>());
    }
}
