//! Fixed-shape objects that hold a single value:
//! thunks, tasks, mutable cells, and the terminator record.

use {
    super::{ObjRef, ObjectHeader, alloc_object, tag},
    std::{mem::size_of, ptr},
};

/* -------------------------------------------------------------------------- */
/*                                    Thunk                                   */
/* -------------------------------------------------------------------------- */

/// In-memory representation of thunk objects.
///
/// A thunk memoizes the result of a nullary computation.
/// Once the result has been computed it is stored in `value`
/// and the closure is released.
/// Only forced thunks can appear in compacted regions,
/// so region-resident thunks always have a null closure.
#[repr(C)]
pub struct Thunk
{
    pub (crate) header: ObjectHeader,

    /// The memoized result.
    pub value: ObjRef,

    /// The suspended computation; null once forced.
    pub closure: ObjRef,
}

/// Byte footprint of a thunk object.
pub fn thunk_size() -> usize
{
    size_of::<Thunk>()
}

/// Create a new, already forced thunk object.
pub fn new_thunk(value: ObjRef) -> ObjRef
{
    let ptr = alloc_object(thunk_size()).cast::<Thunk>();

    // SAFETY: The allocation is large enough for the struct.
    unsafe {
        let header = ObjectHeader::new(tag::THUNK, 0);
        let closure = ObjRef::from_offset(0);
        ptr::write(ptr, Thunk{header, value, closure});
        ObjRef::from_ptr(ptr.cast())
    }
}

/* -------------------------------------------------------------------------- */
/*                                    Task                                    */
/* -------------------------------------------------------------------------- */

/// In-memory representation of task objects.
///
/// A task is the result slot of a concurrent computation.
/// Tasks never appear in compacted regions;
/// they are re-encoded as thunks when compacted.
#[repr(C)]
pub struct Task
{
    pub (crate) header: ObjectHeader,

    /// The finished result.
    pub value: ObjRef,
}

/// Byte footprint of a task object.
pub fn task_size() -> usize
{
    size_of::<Task>()
}

/// Create a new, already finished task object.
pub fn new_task(value: ObjRef) -> ObjRef
{
    let ptr = alloc_object(task_size()).cast::<Task>();

    // SAFETY: The allocation is large enough for the struct.
    unsafe {
        let header = ObjectHeader::new(tag::TASK, 0);
        ptr::write(ptr, Task{header, value});
        ObjRef::from_ptr(ptr.cast())
    }
}

/* -------------------------------------------------------------------------- */
/*                                     Ref                                    */
/* -------------------------------------------------------------------------- */

/// In-memory representation of mutable cell objects.
///
/// Cells are the only kind whose field can be reassigned,
/// and hence the only way reference cycles can be formed.
#[repr(C)]
pub struct Ref
{
    pub (crate) header: ObjectHeader,

    /// The current contents of the cell.
    pub value: ObjRef,
}

/// Byte footprint of a cell object.
pub fn ref_size() -> usize
{
    size_of::<Ref>()
}

/// Create a new mutable cell object.
pub fn new_ref(value: ObjRef) -> ObjRef
{
    let ptr = alloc_object(ref_size()).cast::<Ref>();

    // SAFETY: The allocation is large enough for the struct.
    unsafe {
        let header = ObjectHeader::new(tag::REF, 0);
        ptr::write(ptr, Ref{header, value});
        ObjRef::from_ptr(ptr.cast())
    }
}

/// Reassign the contents of a cell.
///
/// # Safety
///
/// The reference must point to a live cell object.
pub unsafe fn ref_set(o: ObjRef, value: ObjRef)
{
    (*o.deref::<Ref>()).value = value;
}

/* -------------------------------------------------------------------------- */
/*                                 Terminator                                 */
/* -------------------------------------------------------------------------- */

/// Record that terminates the data block of a compacted object graph.
///
/// The root reference is stored in a full record of its own
/// so that it is word-aligned regardless of the header size.
/// This kind never appears on the live heap.
#[repr(C)]
pub struct Terminator
{
    pub (crate) header: ObjectHeader,

    /// The root of the graph that precedes this record.
    pub value: ObjRef,
}

/// Byte footprint of a terminator record.
pub fn terminator_size() -> usize
{
    size_of::<Terminator>()
}

#[cfg(test)]
mod tests
{
    use {super::*, crate::object::{Kind, dealloc_object}};

    #[test]
    fn single_value_kinds_round_trip()
    {
        let v = ObjRef::from_scalar(42);

        unsafe {
            let t = new_thunk(v);
            assert_eq!(t.kind(), Kind::Thunk);
            assert_eq!((*t.deref::<Thunk>()).value, v);

            let k = new_task(v);
            assert_eq!(k.kind(), Kind::Task);
            assert_eq!((*k.deref::<Task>()).value, v);

            let r = new_ref(v);
            assert_eq!(r.kind(), Kind::Ref);
            ref_set(r, ObjRef::from_scalar(7));
            assert_eq!((*r.deref::<Ref>()).value.scalar_value(), 7);

            dealloc_object(t);
            dealloc_object(k);
            dealloc_object(r);
        }
    }
}
