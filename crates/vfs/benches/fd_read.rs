//! Strided read throughput through a lazyfd descriptor, against a
//! memfd baseline.
//!
//! A fully pre-populated linear buffer is mapped read-only and every
//! 16th byte is touched; the same access pattern runs over a plain
//! `memfd_create` mapping. After the first pass both sit entirely in the
//! page cache, so steady-state iterations compare cached access paths.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use lazyfd_vfs::{LinearBuffer, Manager, ManagerOptions, OpenMode};

const SIZE: usize = 32 * 1024 * 1024;
const STRIDE: usize = 16;

fn stride_sum(mem: &[u8]) -> u64 {
    let mut sum: u64 = 0;
    let mut i: usize = 0;
    while i < mem.len() {
        sum += mem[i] as u64;
        i += STRIDE;
    }
    sum
}

fn bench_stride_read(c: &mut Criterion) {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = match Manager::new(ManagerOptions::default().with_mountpoint(dir.path().join("mnt"))) {
        Ok(manager) => manager,
        Err(err) => {
            eprintln!("skipping bench, cannot mount FUSE here: {err}");
            return;
        }
    };

    let mut group = c.benchmark_group("stride_read");
    group.throughput(Throughput::Bytes((SIZE / STRIDE) as u64));

    // lazyfd: pre-populated linear buffer behind a descriptor
    {
        let buffer = Arc::new(LinearBuffer::new(vec![7u8; SIZE]));
        buffer.blocks_populated(0, buffer.block_count());
        buffer.population_finished();

        let file: File = File::from(
            manager
                .create_shared(SIZE as u64, OpenMode::ReadOnly, buffer)
                .expect("create_shared"),
        );

        unsafe {
            let base: *mut u8 = rustix::mm::mmap(
                std::ptr::null_mut(),
                SIZE,
                rustix::mm::ProtFlags::READ,
                rustix::mm::MapFlags::PRIVATE,
                &file,
                0,
            )
            .expect("mmap")
            .cast();
            let mem: &[u8] = std::slice::from_raw_parts(base, SIZE);

            group.bench_function("lazyfd", |b| b.iter(|| stride_sum(mem)));

            rustix::mm::munmap(base.cast(), SIZE).expect("munmap");
        }
    }

    // baseline: the same bytes in a memfd
    {
        let file: File = File::from(
            rustix::fs::memfd_create("bench", rustix::fs::MemfdFlags::CLOEXEC).expect("memfd"),
        );
        file.write_all_at(&vec![7u8; SIZE], 0).expect("fill memfd");

        unsafe {
            let base: *mut u8 = rustix::mm::mmap(
                std::ptr::null_mut(),
                SIZE,
                rustix::mm::ProtFlags::READ,
                rustix::mm::MapFlags::SHARED,
                &file,
                0,
            )
            .expect("mmap")
            .cast();
            let mem: &[u8] = std::slice::from_raw_parts(base, SIZE);

            group.bench_function("memfd", |b| b.iter(|| stride_sum(mem)));

            rustix::mm::munmap(base.cast(), SIZE).expect("munmap");
        }
    }

    group.finish();
    manager.shutdown().expect("shutdown");
}

criterion_group!(benches, bench_stride_read);
criterion_main!(benches);
