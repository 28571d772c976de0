//! Basic usage of the `compacting_strings` crate:
//!
//! * Creating pooled strings.
//! * Destroying a string and watching a sibling get relocated.
//! * Embedding a handle as a raw pointer, the way row storage does.
//! * Building scratch strings in an arena.

use compacting_strings::{Arena, PooledStringRef, StringRef};

fn main() {
    let mut alice = StringRef::create(5).unwrap();
    alice.write(|bytes| bytes.copy_from_slice(b"Alice"));

    let mut bob = StringRef::create(5).unwrap();
    bob.write(|bytes| bytes.copy_from_slice(b"Bob!!"));

    println!("Bob's bytes are at {:?}", bob.get());

    // Alice occupies the first block of the pool, so destroying her moves Bob into it.
    alice.destroy();

    println!("After destroying Alice, Bob's bytes are at {:?}", bob.get());
    bob.read(|bytes| println!("Bob is still {}", String::from_utf8_lossy(bytes)));

    // A row stores the fixed-width pointer and regains ownership when the row is deleted.
    let row_slot = bob.into_raw();

    // SAFETY: The pointer came from into_raw() and ownership is restored only once.
    let bob = unsafe { PooledStringRef::from_raw(row_slot) };
    bob.destroy();

    // Scratch strings for a single statement live in an arena and are reclaimed together.
    let mut arena = Arena::new();

    for word in ["select", "from", "where"] {
        let scratch = StringRef::create_temporary(word.len(), &arena).unwrap();
        scratch.write(|bytes| bytes.copy_from_slice(word.as_bytes()));
    }

    println!("Arena handed out {} bytes", arena.allocated_bytes());
    arena.reset();
}
