use criterion::*;
use rand::prelude::*;

use nnet::nn::data::{DataBatch, SparseEntry};
use nnet::nn::trainers::{SparseTrainer, TrainerOps};

const NUM_FEATURES: usize = 65536;
const BATCH: usize = 64;
const NNZ_PER_ROW: usize = 32;

fn build_trainer(nthread: usize) -> SparseTrainer {
    let mut trainer = SparseTrainer::new();
    for (name, val) in [
        ("silent", "1".to_owned()),
        ("seed", "0".to_owned()),
        ("loss", "1".to_owned()),
        ("eta", "0.01".to_owned()),
        ("sparse:nhidden", "256".to_owned()),
        ("input_shape", format!("1,1,{}", NUM_FEATURES)),
        ("batch_size", BATCH.to_string()),
        ("nthread", nthread.to_string()),
        ("layer[+1]", "fullc".to_owned()),
        ("nhidden", "1".to_owned()),
    ] {
        trainer.set_param(name, &val).unwrap();
    }
    trainer.init_model().unwrap();
    trainer
}

fn build_batch(rng: &mut StdRng) -> DataBatch {
    let rows = (0..BATCH)
        .map(|_| {
            (0..NNZ_PER_ROW)
                .map(|_| SparseEntry {
                    findex: rng.gen_range(0..NUM_FEATURES as u32),
                    fvalue: rng.gen_range(-1.0..1.0),
                })
                .collect()
        })
        .collect();
    let labels = (0..BATCH).map(|_| rng.gen_range(-1.0..1.0)).collect();
    DataBatch::sparse(rows, labels)
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);
    let batch = build_batch(&mut rng);

    for nthread in [1, 4] {
        let mut trainer = build_trainer(nthread);
        c.bench_function(&format!("sparse step {} threads", nthread), |b| {
            b.iter(|| trainer.update(black_box(&batch)).unwrap())
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
