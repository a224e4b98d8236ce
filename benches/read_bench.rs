use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rvzstream::container::{Container, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom};

#[path = "../tests/common/mod.rs"]
mod common;
use common::*;

const DATA_START: u64 = 0x5_0000;

fn gamecube_image() -> Vec<u8> {
    let mut b = ContainerBuilder::new(RVZ, GAMECUBE, 0x2_0000, 0x40_0000);
    b.raw.push((0x80, 0x40_0000 - 0x80, 0, 32));
    for i in 0..32 {
        b.group(Group::Compressed { bytes: pattern(0x2_0000, i), framed: false });
    }
    b.build()
}

fn wii_image() -> Vec<u8> {
    let mut b = ContainerBuilder::new(RVZ, WII, 0x20_0000, DATA_START + 64 * 0x8000);
    b.raw.push((0x80, DATA_START - 0x80, 0, 1));
    b.group(Group::Zero);
    let mut g = vec![0u8; 4];
    g.extend_from_slice(&pattern(64 * 0x7C00, 1));
    b.group(Group::Compressed { bytes: g, framed: false });
    b.partitions.push(Partition { key: [7; 16], data: [(10, 64, 1, 1), (74, 0, 2, 0)] });
    b.build()
}

fn bench_sequential(c: &mut Criterion) {
    let image = gamecube_image();
    let mut disc = Container::from_reader(Cursor::new(image), &OpenOptions::default()).unwrap();
    let mut buf = vec![0u8; 0x10_0000];

    c.bench_function("sequential_4mb_raw", |b| {
        b.iter(|| {
            disc.seek(SeekFrom::Start(0)).unwrap();
            while disc.read(&mut buf).unwrap() > 0 {
                black_box(&buf);
            }
        })
    });
}

fn bench_random(c: &mut Criterion) {
    let image = gamecube_image();
    let mut disc = Container::from_reader(Cursor::new(image), &OpenOptions::default()).unwrap();
    let mut buf = [0u8; 0x800];
    let mut state = 0x1234_5678u64;

    c.bench_function("random_2k_raw", |b| {
        b.iter(|| {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let offset = (state >> 16) % (0x40_0000 - 0x800);
            black_box(disc.read_at(offset, &mut buf));
        })
    });
}

fn bench_reencrypt(c: &mut Criterion) {
    let image = wii_image();
    let mut disc = Container::from_reader(Cursor::new(image), &OpenOptions::default()).unwrap();
    let mut sector = vec![0u8; 0x8000];

    c.bench_function("reencrypt_group_2mb", |b| {
        b.iter(|| {
            disc.reader_mut().clear_caches();
            black_box(disc.read_at(DATA_START, &mut sector));
        })
    });
}

criterion_group!(benches, bench_sequential, bench_random, bench_reencrypt);
criterion_main!(benches);
