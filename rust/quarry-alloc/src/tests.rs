use std::ptr::NonNull;

use quarry_common::{ErrorKind, Result};

use crate::{BitmapStorage, FixedPool, MemoryResource, SlabStorage, StackStorage, bitmap};

struct StackResource<'a> {
    storage: &'a mut StackStorage<1024, 8, 16>,
}

impl MemoryResource for StackResource<'_> {
    fn allocate(&mut self, bytes: usize, alignment: usize) -> Result<NonNull<u8>> {
        assert!(alignment <= 16);
        self.storage.allocate(bytes)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, _bytes: usize, _alignment: usize) {
        self.storage.deallocate(ptr).unwrap();
    }
}

#[test]
fn test_pool_over_stack_storage() {
    let mut storage = StackStorage::<1024, 8, 16>::new();
    {
        let mut pool = FixedPool::new(
            128,
            StackResource {
                storage: &mut storage,
            },
        );
        let blocks: Vec<_> = (0..8).map(|_| pool.allocate(100, 16).unwrap()).collect();
        // The stack is full, both in bytes and in slots.
        let e = pool.allocate(100, 16).unwrap_err();
        assert!(matches!(
            e.kind(),
            ErrorKind::BookkeepingExhausted { .. } | ErrorKind::MemoryExhausted { .. }
        ));

        for block in &blocks {
            unsafe { pool.deallocate(*block, 100) };
        }
        let again = pool.allocate(50, 16).unwrap();
        assert!(blocks.contains(&again));
        unsafe { pool.deallocate(again, 50) };
    }
    assert_eq!(storage.free(), 1024);
    assert_eq!(storage.free_spans().len(), 1);
}

#[test]
fn test_bitmap_strategy_over_slab_memory() {
    let mut slab = SlabStorage::<1024, 16>::new();
    let base = slab.allocate(32 * 16).unwrap();
    let mut mask = 0u32;

    let first = bitmap::allocate(&mut mask, base, 16).unwrap();
    let second = bitmap::allocate(&mut mask, base, 16).unwrap();
    assert_eq!(first, base);
    assert_eq!(second.as_ptr() as usize - base.as_ptr() as usize, 16);
    assert!(bitmap::deallocate(first, &mut mask, base, 16));
    assert_eq!(bitmap::next_bit(mask), 0);
    assert_eq!(slab.free(), 512);
}

#[test]
fn test_storages_can_move_between_threads() {
    let mut storage = BitmapStorage::<u64, 32>::new();
    let block = storage.allocate(32).unwrap();
    let address = block.as_ptr() as usize;
    let storage = std::thread::spawn(move || {
        let block = NonNull::new(address as *mut u8).unwrap();
        storage.deallocate(block).unwrap();
        storage
    })
    .join()
    .unwrap();
    assert_eq!(storage.allocated_blocks(), 0);
}
