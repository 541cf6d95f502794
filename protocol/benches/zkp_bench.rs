// Zero-knowledge proof benchmarks for the Lango trust core.
//
// Covers key generation for the wallet ownership circuit, and proving and
// verifying the ownership proof on both backends. The handshake
// hot path is prove (initiator) plus verify (responder).

use criterion::{criterion_group, criterion_main, Criterion};

use lango_p2p::zkp::{
    CircuitKind, FieldElement, ProofScheme, ProverService, SrsMode, Witness,
    WALLET_OWNERSHIP_CIRCUIT,
};

fn ownership_witness(prover: &ProverService) -> Witness {
    let response = prover.field_from_bytes(b"signed challenge response");
    let challenge = prover.field_from_bytes(b"handshake nonce");
    Witness::WalletOwnership {
        response,
        challenge,
        public_key_hash: prover.mimc_hash(&[response, challenge]),
    }
}

fn compiled(scheme: ProofScheme) -> ProverService {
    let prover = ProverService::new(scheme, SrsMode::Unsafe);
    prover
        .compile(WALLET_OWNERSHIP_CIRCUIT, CircuitKind::WalletOwnership)
        .unwrap();
    prover
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("zkp/compile_wallet_ownership_groth16", |b| {
        b.iter(|| compiled(ProofScheme::Groth16));
    });
    c.bench_function("zkp/compile_wallet_ownership_plonk", |b| {
        b.iter(|| compiled(ProofScheme::Plonk));
    });
}

fn bench_mimc(c: &mut Criterion) {
    let inputs = [FieldElement::from_u64(7), FieldElement::from_u64(11)];
    c.bench_function("zkp/mimc_hash_bn254", |b| {
        b.iter(|| ProofScheme::Groth16.hash(&inputs));
    });
}

fn bench_prove_and_verify(c: &mut Criterion) {
    for (label, scheme) in [
        ("groth16", ProofScheme::Groth16),
        ("plonk", ProofScheme::Plonk),
    ] {
        let prover = compiled(scheme);
        let witness = ownership_witness(&prover);

        c.bench_function(&format!("zkp/prove_wallet_ownership_{label}"), |b| {
            b.iter(|| prover.prove(WALLET_OWNERSHIP_CIRCUIT, &witness).unwrap());
        });

        let proof = prover.prove(WALLET_OWNERSHIP_CIRCUIT, &witness).unwrap();
        let inputs = witness.public_inputs();
        c.bench_function(&format!("zkp/verify_wallet_ownership_{label}"), |b| {
            b.iter(|| assert!(prover.verify(&proof, &inputs).unwrap()));
        });
    }
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_compile, bench_mimc, bench_prove_and_verify
}
criterion_main!(benches);
