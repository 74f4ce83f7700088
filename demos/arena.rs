use std::io::Read;
use std::ptr::{self, NonNull};

use rheap::Arena;

/// Waits until the user presses ENTER.
/// Useful when you want to inspect the process with tools like `pmap` or
/// `/proc/<pid>/maps` and watch mappings appear and disappear.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints where an allocation landed and the arena's bookkeeping after it.
fn print_alloc(
  arena: &Arena,
  label: &str,
  size: usize,
  ptr: NonNull<u8>,
) {
  let stats = arena.stats();
  let place = if arena.region_contains(ptr.as_ptr()) {
    "region"
  } else {
    "dedicated mapping"
  };

  println!(
    "[{label}] {size} bytes at {ptr:p} ({place}), usable = {:?}",
    arena.usable_size(ptr)
  );
  println!(
    "    committed = {}, free = {} in {} chunks",
    stats.committed_bytes,
    stats.free_bytes,
    stats.free_chunks,
  );
}

fn main() -> rheap::Result<()> {
  env_logger::init();

  let mut arena = Arena::create()?;
  let page_size = arena.page_size();

  println!(
    "PID = {}, page size = {page_size}, mmap threshold = {}",
    std::process::id(),
    arena.mmap_threshold()
  );
  block_until_enter_pressed();

  unsafe {
    // --------------------------------------------------------------------
    // 1) Two small blocks split from the initial wilderness.
    // --------------------------------------------------------------------
    let first = arena.allocate(128)?;
    print_alloc(&arena, "1a", 128, first);
    let second = arena.allocate(128)?;
    print_alloc(&arena, "1b", 128, second);

    ptr::write_bytes(first.as_ptr(), 0xAB, 128);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Growing the first block has to move it: the second one is in the
    //    way. Its bytes come along.
    // --------------------------------------------------------------------
    let moved = arena.resize(first.as_ptr(), 256)?;
    print_alloc(&arena, "2", 256, moved);
    println!(
      "[2] moved = {}, first byte = 0x{:X}",
      moved != first,
      moved.as_ptr().read()
    );
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Release the second block. It coalesces with the hole the move left
    //    behind, so the next request of that size reuses the lowest address
    //    once the wilderness runs out.
    // --------------------------------------------------------------------
    arena.release(second.as_ptr());
    println!("\n[3] released second block, stats = {:?}", arena.stats());
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) A page sized block shrunk in place hands its tail back.
    // --------------------------------------------------------------------
    let page = arena.allocate(page_size)?;
    print_alloc(&arena, "4a", page_size, page);
    let shrunk = arena.resize(page.as_ptr(), 128)?;
    print_alloc(&arena, "4b", 128, shrunk);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) A request at the threshold bypasses the region entirely.
    // --------------------------------------------------------------------
    let large_size = arena.mmap_threshold();
    let large = arena.allocate(large_size)?;
    print_alloc(&arena, "5", large_size, large);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Forget to release one block and ask the arena what is left.
    // --------------------------------------------------------------------
    arena.release(moved.as_ptr());
    arena.release(large.as_ptr());

    println!("\n[6] leak check:");
    arena.report_leaks(|leak| println!("    leaked {leak}"));
  }

  // --------------------------------------------------------------------
  // 7) Tear everything down, leaked block included.
  // --------------------------------------------------------------------
  arena.destroy()?;
  println!("\n[7] arena destroyed");

  Ok(())
}
