use ahgate::{AhTransform, Config, PacketView, SaKey, SaMode, SecurityAssociation};
use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};

fn udp_packet(payload_len: usize) -> Vec<u8> {
    let total = 20 + payload_len;
    let mut p = vec![0u8; total];
    p[0] = 0x45;
    p[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    p[8] = 64;
    p[9] = 17;
    p[12..16].copy_from_slice(&[10, 0, 0, 1]);
    p[16..20].copy_from_slice(&[10, 0, 0, 2]);
    p
}

fn bench_encode(c: &mut Criterion) {
    let transform = AhTransform::new(Config::default());
    let sa = SecurityAssociation::new(
        0x100,
        SaMode::Transport,
        [10, 0, 0, 1],
        [10, 0, 0, 2],
        SaKey::new([7u8; 32]),
        12,
    );
    let packet = udp_packet(1400);

    c.bench_function("encode_contiguous_1400", |b| {
        b.iter(|| {
            let view = PacketView::contiguous(packet.clone()).unwrap();
            transform.encode(&sa, view).unwrap()
        })
    });

    c.bench_function("encode_fragmented_1400", |b| {
        b.iter(|| {
            let head = packet[..64].to_vec();
            let frags: Vec<Bytes> = packet[64..]
                .chunks(256)
                .map(Bytes::copy_from_slice)
                .collect();
            let view = PacketView::new(head, frags, Vec::new(), packet.len()).unwrap();
            transform.encode(&sa, view).unwrap()
        })
    });
}

criterion_group!(benches, bench_encode);
criterion_main!(benches);
