//! 编解码与签名基准测试
//! 使用criterion进行性能测试

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dytvault::domain::{
    crypto_provider::SignatureAlgorithm,
    transaction::{
        build_signed_envelope, signing_bytes, tx_hash, verify_envelope, Denom, Msg, Transaction,
    },
};

fn sample_tx(msgs: usize) -> Transaction {
    let msgs = (0..msgs)
        .map(|i| Msg::send("dyt1sender", format!("dyt1recipient{}", i), Denom::DGT, "100"))
        .collect();
    Transaction::new("dyt-1", 1, msgs, "1", "bench")
}

fn bench_signing_bytes(c: &mut Criterion) {
    let tx = sample_tx(16);
    c.bench_function("signing_bytes_16_msgs", |b| {
        b.iter(|| black_box(signing_bytes(black_box(&tx))))
    });
    c.bench_function("tx_hash_16_msgs", |b| b.iter(|| black_box(tx_hash(black_box(&tx)))));
}

fn bench_sign_verify(c: &mut Criterion) {
    let tx = sample_tx(1);
    for algorithm in [SignatureAlgorithm::Ed25519, SignatureAlgorithm::Dilithium3] {
        let pair = algorithm.keypair();
        c.bench_function(&format!("sign_{}", algorithm.id()), |b| {
            b.iter(|| {
                black_box(build_signed_envelope(
                    &tx,
                    pair.secret_key.as_slice(),
                    &pair.public_key,
                    algorithm,
                ))
            })
        });

        if let Ok(envelope) =
            build_signed_envelope(&tx, pair.secret_key.as_slice(), &pair.public_key, algorithm)
        {
            c.bench_function(&format!("verify_{}", algorithm.id()), |b| {
                b.iter(|| black_box(verify_envelope(black_box(&envelope))))
            });
        }
    }
}

criterion_group!(benches, bench_signing_bytes, bench_sign_verify);
criterion_main!(benches);
