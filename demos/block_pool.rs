use libc::sbrk;
use tagpool::{BlockPool, PoolError};

/// Prints the current program break using `sbrk(0)`.
/// The pool lives on the stack, so the break should not move while it works.
unsafe fn print_program_break(label: &str) {
  println!("[{}] program break (sbrk(0)) = {:?}", label, unsafe { sbrk(0) });
}

fn print_blocks<T, const N: usize>(
  label: &str,
  pool: &BlockPool<T, N>,
) {
  println!("[{label}]");
  for block in pool.blocks() {
    println!(
      "    offset {:>3}  {:?}  payload {:>3} bytes",
      block.offset, block.state, block.size
    );
  }
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::TRACE)
    .init();

  let pool: BlockPool<u32, 100> = BlockPool::new();

  unsafe {
    print_program_break("start");
    print_blocks("fresh pool", &pool);

    // --------------------------------------------------------------------
    // 1) One u32: the 92 byte block is split into 4 used + 80 free.
    // --------------------------------------------------------------------
    let first = match pool.allocate(1) {
      Ok(p) => p,
      Err(e) => panic!("first allocation failed: {e}"),
    };
    pool.construct(first, 0xDEAD_BEEF);
    println!("\n[1] value at first = 0x{:X}", *first.as_ptr());
    print_blocks("after first allocation", &pool);

    // --------------------------------------------------------------------
    // 2) Three more u32s right behind it.
    // --------------------------------------------------------------------
    let second = match pool.allocate(3) {
      Ok(p) => p,
      Err(e) => panic!("second allocation failed: {e}"),
    };
    for i in 0..3 {
      pool.construct(second.add(i), i as u32 + 1);
    }
    print_blocks("after second allocation", &pool);

    // --------------------------------------------------------------------
    // 3) Free the first block. Its neighbour is in use, so a 4 byte hole
    //    stays at the front.
    // --------------------------------------------------------------------
    pool.destroy(first);
    pool.deallocate(first);
    print_blocks("after freeing first", &pool);

    // --------------------------------------------------------------------
    // 4) First fit puts the next single u32 back into that hole.
    // --------------------------------------------------------------------
    let third = match pool.allocate(1) {
      Ok(p) => p,
      Err(e) => panic!("third allocation failed: {e}"),
    };
    println!("\n[4] third reused the hole? {}", third == first);

    // --------------------------------------------------------------------
    // 5) Requests the pool cannot serve.
    // --------------------------------------------------------------------
    match pool.allocate(0) {
      Err(PoolError::EmptyRequest) => println!("\n[5] empty request rejected"),
      other => println!("\n[5] unexpected: {other:?}"),
    }
    if let Err(e) = pool.allocate(64) {
      println!("[5] {e}");
    }

    // --------------------------------------------------------------------
    // 6) Release everything; the buffer collapses back into one block.
    // --------------------------------------------------------------------
    pool.deallocate(third);
    pool.deallocate(second);
    print_blocks("after releasing everything", &pool);
    println!("\n[6] consistent: {}", pool.is_consistent());

    print_program_break("end");
  }
}
