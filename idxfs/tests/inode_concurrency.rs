mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use idxfs::{CacheDaemon, SECTOR_SIZE};

use common::{pattern, Fixture};

#[test]
fn racing_writers_at_end_of_file_allocate_once() {
    let fs = Fixture::new(256, 8);

    // 分别落在直接、一级、二级索引里，以及各自需要新分配的扇区数
    let cases = [
        (0, 1),
        (130 * SECTOR_SIZE + 5, 2),
        (300 * SECTOR_SIZE + 9, 3),
    ];

    for round in 0..21 {
        let file = fs.new_file(0);
        let used = fs.bitmap.used();
        let (offset, expected) = cases[round % cases.len()];

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let file = file.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    file.write_at(offset, &[t; 8])
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(8, handle.join().unwrap());
        }

        assert_eq!(offset + 8, file.len());
        assert_eq!(used + expected, fs.bitmap.used(), "round {round}");

        // 某一个写者的完整 8 字节
        let mut buf = [0; 8];
        file.read_at(offset, &mut buf);
        assert!(buf.iter().all(|&b| b == buf[0]), "{buf:?}");

        file.remove();
    }
}

#[test]
fn disjoint_writers_on_one_file() {
    let fs = Fixture::new(512, 8);
    let file = fs.new_file(0);
    let chunk = 3 * SECTOR_SIZE + 17;

    let handles: Vec<_> = (0..8u8)
        .map(|t| {
            let file = file.clone();
            thread::spawn(move || {
                let offset = t as usize * chunk;
                assert_eq!(chunk, file.write_at(offset, &pattern(chunk, t)));
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(8 * chunk, file.len());
    for t in 0..8u8 {
        let mut buf = vec![0; chunk];
        assert_eq!(chunk, file.read_at(t as usize * chunk, &mut buf));
        assert_eq!(pattern(chunk, t), buf, "writer {t}");
    }
}

#[test]
fn independent_files_under_a_small_cache() {
    let fs = Fixture::new(1024, 4);
    let daemon = CacheDaemon::spawn(fs.cache());

    let handles: Vec<_> = (0..6u8)
        .map(|t| {
            let file = fs.new_file(0);
            thread::spawn(move || {
                let data = pattern(20 * SECTOR_SIZE, t);
                for (i, bytes) in data.chunks(700).enumerate() {
                    assert_eq!(bytes.len(), file.write_at(i * 700, bytes));
                }
                let mut buf = vec![0; data.len()];
                assert_eq!(data.len(), file.read_at(0, &mut buf));
                assert_eq!(data, buf);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    daemon.shutdown();
}

#[test]
fn readers_see_whole_sector_writes() {
    let fs = Fixture::new(64, 4);
    let file = fs.new_file(SECTOR_SIZE);
    file.write_at(0, &[0; SECTOR_SIZE]);

    let writer = {
        let file = file.clone();
        thread::spawn(move || {
            for round in 1..=200u32 {
                file.write_at(0, &[(round % 256) as u8; SECTOR_SIZE]);
            }
        })
    };
    let reader = {
        let file = file.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                let mut buf = [0; SECTOR_SIZE];
                file.read_at(0, &mut buf);
                // 单个扇区内的写入是原子的
                assert!(buf.iter().all(|&b| b == buf[0]));
            }
        })
    };
    writer.join().unwrap();
    reader.join().unwrap();
}
