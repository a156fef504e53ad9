use {
    super::{Arena, TagCounters},
    crate::object::{
        Array,
        Bigint,
        Ctor,
        Kind,
        ObjRef,
        ObjectHeader,
        Ref,
        ScalarArray,
        Str,
        Task,
        Terminator,
        Thunk,
        BIGINT_TAIL,
        array_size,
        object_byte_size,
        scalar_array_size,
        str_size,
        tag,
        terminator_size,
        thunk_size,
    },
    smallvec::SmallVec,
    std::{
        collections::{HashMap, hash_map::DefaultHasher},
        hash::Hasher,
        mem::{size_of, take},
        process::abort,
        ptr,
    },
};

/// Sentinel standing for an offset that is not known yet.
///
/// The sentinel must be distinguishable from every legitimate word:
/// it is even, so it can never be a scalar,
/// and out of range, so it can never be a committed offset.
/// An odd sentinel would be mistaken for a scalar and
/// an unresolved child would never be retried.
pub (super) const NULL_OFFSET: usize = usize::MAX - 1;

/// Key into the sharing table.
///
/// Keys address a completed span of the destination buffer.
/// Hashing and equality are over the raw bytes of the span.
struct SharingKey
{
    offset: usize,
    size: usize,
}

/// Copies a live object graph into a relocatable buffer.
///
/// All state is owned by the compactor instance;
/// independent compactions never share anything.
pub struct Compactor
{
    /// Destination buffer.
    arena: Arena,

    /// Offset of the committed copy of each visited object.
    ///
    /// An object appears here once its copy is fully written
    /// and has survived the sharing check.
    objects: HashMap<ObjRef, usize>,

    /// Offsets of staged cell copies whose contents are not resolved yet.
    ///
    /// Cells are published here before their child is copied,
    /// which is what lets a cycle close back into them.
    reserved: HashMap<ObjRef, usize>,

    /// Content-addressed table of committed spans, for deduplication.
    sharing: HashMap<u64, SmallVec<[SharingKey; 1]>>,

    /// Objects discovered but not yet copied.
    todo: Vec<ObjRef>,

    /// Scratch space for resolved field offsets.
    tmp: Vec<ObjRef>,

    /// Tally of copied objects by tag.
    counters: TagCounters,
}

impl Compactor
{
    /// Create a compactor with an empty buffer.
    pub fn new() -> Self
    {
        Self{
            arena: Arena::new(),
            objects: HashMap::new(),
            reserved: HashMap::new(),
            sharing: HashMap::new(),
            todo: Vec::new(),
            tmp: Vec::new(),
            counters: TagCounters::new(),
        }
    }

    /// Copy the object graph rooted at `root` into the buffer.
    ///
    /// The traversal is iterative; graph depth does not consume stack.
    /// Objects already copied by an earlier call on this compactor
    /// are shared rather than copied again,
    /// so several roots can be compacted into one buffer.
    /// Each call appends one terminator record carrying its root.
    ///
    /// The process is aborted if the graph contains a closure or an
    /// external object; no encoding exists for either,
    /// and a partial buffer must never escape.
    ///
    /// # Safety
    ///
    /// Every reference reachable from `root` must point to a live
    /// object, and no other thread may mutate the graph during the
    /// call.
    pub unsafe fn compact(&mut self, root: ObjRef)
    {
        debug_assert!(self.todo.is_empty());

        if !root.is_scalar() {
            self.todo.push(root);

            while let Some(&curr) = self.todo.last() {
                if self.objects.contains_key(&curr) {
                    self.todo.pop();
                    continue;
                }

                debug_assert!(!curr.is_scalar());

                let done = match curr.kind() {
                    Kind::Ctor(..)    => self.insert_ctor(curr),
                    Kind::Array       => self.insert_array(curr),
                    Kind::ScalarArray => { self.insert_scalar_array(curr); true }
                    Kind::String      => { self.insert_string(curr); true }
                    Kind::Bigint      => { self.insert_bigint(curr); true }
                    Kind::Thunk       => self.insert_thunk(curr),
                    Kind::Task        => self.insert_task(curr),
                    Kind::Ref         => self.insert_ref(curr),
                    Kind::Closure     =>
                        fatal("Closure objects cannot be compacted"),
                    Kind::External    =>
                        fatal("External objects cannot be compacted"),
                    Kind::Reserved    =>
                        fatal("Reserved tag on a live object"),
                };

                if done {
                    self.todo.pop();
                }
            }

            self.tmp.clear();
        }

        debug_assert!(self.reserved.is_empty());
        self.insert_terminator(root);
        self.counters.log_summary();
    }

    /// The address of the buffer.
    ///
    /// Invalidated by the next call to [`compact`][`Self::compact`].
    pub fn data(&self) -> *const u8
    {
        self.arena.base()
    }

    /// The number of buffer bytes written so far.
    pub fn size(&self) -> usize
    {
        self.arena.len()
    }

    /// View the buffer written so far.
    pub fn as_bytes(&self) -> &[u8]
    {
        self.arena.bytes(0, self.arena.len())
    }

    /// The tally of copied objects.
    pub fn counters(&self) -> &TagCounters
    {
        &self.counters
    }

    /* ---------------------------- resolution ----------------------------- */

    /// Resolve a reference to its in-buffer encoding.
    ///
    /// Scalars are their own encoding.
    /// An object that has no copy yet is scheduled
    /// and [`NULL_OFFSET`] is returned;
    /// the caller must retry after the pending work is done.
    fn to_offset(&mut self, o: ObjRef) -> ObjRef
    {
        if o.is_scalar() {
            return o;
        }
        if let Some(&offset) = self.objects.get(&o) {
            return ObjRef::from_offset(offset);
        }
        if let Some(&offset) = self.reserved.get(&o) {
            return ObjRef::from_offset(offset);
        }
        self.todo.push(o);
        ObjRef::from_offset(NULL_OFFSET)
    }

    /// Record the committed offset of an object's copy.
    fn save(&mut self, o: ObjRef, offset: usize)
    {
        debug_assert!(offset < self.arena.len());
        // SAFETY: Our caller holds a live reference.
        self.counters.note(unsafe { o.tag() });
        self.objects.insert(o, offset);
    }

    /// Run the sharing check over a staged copy, then record it.
    ///
    /// If a byte-identical span was committed earlier,
    /// the staged copy is discarded by rewinding the buffer
    /// and the object resolves to the earlier span instead.
    /// The staged copy must be the most recent allocation,
    /// so that nothing references it yet.
    fn commit(&mut self, o: ObjRef, offset: usize, size: usize)
    {
        let hash = hash_bytes(self.arena.bytes(offset, size));

        let mut surviving = None;
        if let Some(bucket) = self.sharing.get(&hash) {
            for key in bucket {
                if key.size == size
                    && self.arena.bytes(key.offset, key.size)
                        == self.arena.bytes(offset, size)
                {
                    surviving = Some(key.offset);
                    break;
                }
            }
        }

        match surviving {
            Some(prev) => {
                self.arena.truncate(offset);
                self.save(o, prev);
            }
            None => {
                let key = SharingKey{offset, size};
                self.sharing.entry(hash).or_default().push(key);
                self.save(o, offset);
            }
        }
    }

    /* ----------------------------- staging ------------------------------- */

    /// Stage a verbatim copy of an object in the buffer.
    ///
    /// The header of the copy is rewritten for region residency;
    /// everything after the header is copied as is
    /// and any reference fields still hold live addresses.
    unsafe fn stage_copy(&mut self, o: ObjRef) -> (usize, usize)
    {
        let size = object_byte_size(o);
        let offset = self.arena.alloc(size);

        ptr::copy_nonoverlapping(
            o.as_ptr().cast::<u8>(),
            self.arena.at::<u8>(offset),
            size,
        );

        let src = &*o.as_ptr();
        let header = self.arena.at::<ObjectHeader>(offset);
        *header = ObjectHeader::for_region(src.tag, src.other, size);

        (offset, size)
    }

    unsafe fn insert_ctor(&mut self, o: ObjRef) -> bool
    {
        let ctor = &*o.deref::<Ctor>();
        let num_fields = ctor.num_fields();

        let mut offsets = take(&mut self.tmp);
        offsets.clear();
        let mut missing_children = false;
        for i in 0 .. num_fields {
            let c = self.to_offset(ctor.field(i));
            if c.raw() == NULL_OFFSET {
                missing_children = true;
            }
            offsets.push(c);
        }

        if missing_children {
            self.tmp = offsets;
            return false;
        }

        let (offset, size) = self.stage_copy(o);
        let copy = &mut *self.arena.at::<Ctor>(offset);
        for (i, &c) in offsets.iter().enumerate() {
            copy.set_field(i, c);
        }

        self.tmp = offsets;
        self.commit(o, offset, size);
        true
    }

    unsafe fn insert_array(&mut self, o: ObjRef) -> bool
    {
        let arr = &*o.deref::<Array>();
        let len = arr.size;

        let mut offsets = take(&mut self.tmp);
        offsets.clear();
        let mut missing_children = false;
        for i in 0 .. len {
            let c = self.to_offset(arr.elem(i));
            if c.raw() == NULL_OFFSET {
                missing_children = true;
            }
            offsets.push(c);
        }

        if missing_children {
            self.tmp = offsets;
            return false;
        }

        let size = array_size(len);
        let offset = self.arena.alloc(size);
        let copy = self.arena.at::<Array>(offset);
        let header = ObjectHeader::for_region(tag::ARRAY, 0, size);
        ptr::write(copy, Array{header, size: len, capacity: len, elems: []});
        let elems = (*copy).elems_ptr();
        for (i, &c) in offsets.iter().enumerate() {
            *elems.add(i) = c;
        }

        self.tmp = offsets;
        self.commit(o, offset, size);
        true
    }

    unsafe fn insert_scalar_array(&mut self, o: ObjRef)
    {
        let sa = &*o.deref::<ScalarArray>();
        let len = sa.size;
        let elem_size = sa.elem_size();

        let size = scalar_array_size(elem_size, len);
        let offset = self.arena.alloc(size);
        let copy = self.arena.at::<ScalarArray>(offset);
        let header =
            ObjectHeader::for_region(tag::SCALAR_ARRAY, elem_size as u8, size);
        let this = ScalarArray{header, size: len, capacity: len, data: []};
        ptr::write(copy, this);
        ptr::copy_nonoverlapping(
            sa.bytes().as_ptr(),
            (*copy).data_ptr(),
            elem_size * len,
        );

        self.commit(o, offset, size);
    }

    unsafe fn insert_string(&mut self, o: ObjRef)
    {
        let s = &*o.deref::<Str>();

        let size = str_size(s.size);
        let offset = self.arena.alloc(size);
        let copy = self.arena.at::<Str>(offset);
        let header = ObjectHeader::for_region(tag::STRING, 0, size);
        let this = Str{
            header,
            size: s.size,
            capacity: s.size,
            length: s.length,
            data: [],
        };
        ptr::write(copy, this);
        ptr::copy_nonoverlapping(
            s.as_str().as_ptr(),
            (*copy).data_ptr(),
            s.size - 1,
        );
        // The terminating nul is already there: allocations are zeroed.

        self.commit(o, offset, size);
    }

    unsafe fn insert_bigint(&mut self, o: ObjRef)
    {
        let digits = (*o.deref::<Bigint>()).value.to_string();

        // The record must fit the digits and nul now, and one aligned
        // link pointer once the reader has decoded the digits in place.
        // Not entered into the sharing table: the tail of the record
        // is scratch space that the reader writes to.
        let extra = (digits.len() + 1).max(size_of::<*mut Bigint>());
        let size = BIGINT_TAIL + extra;
        let offset = self.arena.alloc(size);

        let header = self.arena.at::<ObjectHeader>(offset);
        *header = ObjectHeader::for_region(tag::BIGINT, 0, size);

        ptr::copy_nonoverlapping(
            digits.as_ptr(),
            self.arena.at::<u8>(offset + BIGINT_TAIL),
            digits.len(),
        );
        // The terminating nul is already there: allocations are zeroed.

        self.save(o, offset);
    }

    unsafe fn insert_thunk(&mut self, o: ObjRef) -> bool
    {
        let value = (*o.deref::<Thunk>()).value;
        let c = self.to_offset(value);
        if c.raw() == NULL_OFFSET {
            return false;
        }

        let (offset, size) = self.stage_copy(o);
        let copy = &mut *self.arena.at::<Thunk>(offset);
        copy.value = c;
        // Only forced thunks are compactable; the copy never
        // carries a closure.
        copy.closure = ObjRef::from_offset(0);

        self.commit(o, offset, size);
        true
    }

    unsafe fn insert_task(&mut self, o: ObjRef) -> bool
    {
        let value = (*o.deref::<Task>()).value;
        let c = self.to_offset(value);
        if c.raw() == NULL_OFFSET {
            return false;
        }

        // Tasks are written out in the thunk shape.
        // Whether concurrency is enabled is a deployment-time choice,
        // and a buffer written with it enabled must load in a process
        // that has it disabled, and vice versa.
        // The thunk shape is the one everybody understands.
        let size = thunk_size();
        let offset = self.arena.alloc(size);
        let copy = self.arena.at::<Thunk>(offset);
        let header = ObjectHeader::for_region(tag::THUNK, 0, size);
        let closure = ObjRef::from_offset(0);
        ptr::write(copy, Thunk{header, value: c, closure});

        self.commit(o, offset, size);
        true
    }

    unsafe fn insert_ref(&mut self, o: ObjRef) -> bool
    {
        // Cells are where cycles close, so the copy is placed and
        // published before the contents are resolved.
        // A back-edge into this cell then finds the reserved offset
        // instead of scheduling the cell again.
        // Cells are never entered into the sharing table:
        // they are mutable, so two equal cells must stay distinct.
        let offset = match self.reserved.get(&o) {
            Some(&offset) => offset,
            None => {
                let (offset, _) = self.stage_copy(o);
                self.reserved.insert(o, offset);
                offset
            }
        };

        let value = (*o.deref::<Ref>()).value;
        let c = self.to_offset(value);
        if c.raw() == NULL_OFFSET {
            return false;
        }

        (*self.arena.at::<Ref>(offset)).value = c;
        self.reserved.remove(&o);
        self.save(o, offset);
        true
    }

    unsafe fn insert_terminator(&mut self, root: ObjRef)
    {
        let value = self.to_offset(root);
        debug_assert!(value.raw() != NULL_OFFSET);

        let size = terminator_size();
        let offset = self.arena.alloc(size);
        let header = ObjectHeader::for_region(tag::RESERVED, 0, size);
        let copy = self.arena.at::<Terminator>(offset);
        ptr::write(copy, Terminator{header, value});
    }
}

impl Default for Compactor
{
    fn default() -> Self
    {
        Self::new()
    }
}

/// Report an unencodable object, then abort.
///
/// There is no safe partial result:
/// a buffer missing part of its graph must never escape.
fn fatal(message: &str) -> !
{
    log::error!("{}", message);
    abort();
}

fn hash_bytes(bytes: &[u8]) -> u64
{
    let mut hasher = DefaultHasher::new();
    hasher.write(bytes);
    hasher.finish()
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::object::{ctor_size, new_array, new_ctor, new_string},
    };

    /// Walk the records of a finished buffer,
    /// pairing each record offset with its tag.
    ///
    /// Graphs used with this helper must not contain big integers;
    /// sizing those records requires decoding them.
    fn record_offsets(c: &Compactor) -> Vec<(usize, u8)>
    {
        let bytes = c.as_bytes();
        let mut records = Vec::new();
        let mut offset = 0;

        while offset < bytes.len() {
            // SAFETY: Offsets are aligned; records are in bounds.
            unsafe {
                let header = &*(bytes.as_ptr().add(offset)
                    as *const ObjectHeader);
                records.push((offset, header.tag));
                let size = match Kind::from_tag(header.tag) {
                    Kind::Ctor(..) => ctor_size(header.other as usize),
                    Kind::Array => {
                        let a = &*(header as *const ObjectHeader)
                            .cast::<Array>();
                        array_size(a.size)
                    }
                    Kind::ScalarArray => {
                        let a = &*(header as *const ObjectHeader)
                            .cast::<ScalarArray>();
                        scalar_array_size(a.elem_size(), a.size)
                    }
                    Kind::String => {
                        let s = &*(header as *const ObjectHeader)
                            .cast::<Str>();
                        str_size(s.size)
                    }
                    Kind::Thunk => thunk_size(),
                    Kind::Ref => crate::object::ref_size(),
                    Kind::Reserved => terminator_size(),
                    other => panic!("Unexpected record kind: {:?}", other),
                };
                offset += size.next_multiple_of(crate::object::OBJECT_ALIGN);
            }
        }

        records
    }

    #[test]
    fn scalar_root_writes_only_a_terminator()
    {
        let mut c = Compactor::new();
        // SAFETY: A scalar graph holds no references.
        unsafe { c.compact(ObjRef::from_scalar(5)); }

        assert_eq!(c.size(), terminator_size());
        let records = record_offsets(&c);
        assert_eq!(records, vec![(0, tag::RESERVED)]);
    }

    #[test]
    fn identical_strings_share_one_record()
    {
        let a = new_string("hello");
        let b = new_string("hello");
        let root = new_array(&[a, b]);

        let mut c = Compactor::new();
        // SAFETY: The graph is live and unaliased.
        unsafe { c.compact(root); }

        let occurrences = c.as_bytes()
            .windows(5)
            .filter(|w| *w == b"hello")
            .count();
        assert_eq!(occurrences, 1);

        assert_eq!(c.counters().count(Kind::String), 2);
        assert_eq!(c.counters().count(Kind::Array), 1);
    }

    #[test]
    fn children_precede_parents()
    {
        let leaf = new_ctor(1, &[ObjRef::from_scalar(3)]);
        let mid = new_ctor(2, &[leaf, new_string("x")]);
        let root = new_array(&[mid, leaf]);

        let mut c = Compactor::new();
        // SAFETY: The graph is live and unaliased.
        unsafe { c.compact(root); }

        let records = record_offsets(&c);

        // Every record fits below the end of the buffer.
        for &(offset, _) in &records {
            assert!(offset < c.size());
        }

        // Every reference field of every record points strictly backwards.
        for &(offset, t) in &records {
            let fields: Vec<ObjRef> = unsafe {
                let header = c.data().add(offset) as *const ObjectHeader;
                match Kind::from_tag(t) {
                    Kind::Ctor(..) => {
                        let ctor = &*header.cast::<Ctor>();
                        (0 .. ctor.num_fields())
                            .map(|i| ctor.field(i))
                            .collect()
                    }
                    Kind::Array => {
                        let arr = &*header.cast::<Array>();
                        (0 .. arr.size).map(|i| arr.elem(i)).collect()
                    }
                    Kind::Reserved => {
                        let term = &*header.cast::<Terminator>();
                        vec![term.value]
                    }
                    _ => Vec::new(),
                }
            };

            for field in fields {
                if !field.is_scalar() {
                    assert!(field.raw() < offset);
                }
            }
        }
    }

    #[test]
    fn second_root_shares_earlier_copies()
    {
        let shared = new_string("shared");
        let first = new_array(&[shared]);
        let second = new_ctor(0, &[shared]);

        let mut c = Compactor::new();
        // SAFETY: The graphs are live and unaliased.
        unsafe {
            c.compact(first);
            let after_first = c.size();
            c.compact(second);

            // The second graph added its ctor and terminator,
            // but no second copy of the string.
            let added = c.size() - after_first;
            assert_eq!(added, ctor_size(1) + terminator_size());
        }
        assert_eq!(c.counters().count(Kind::String), 1);
    }
}
