use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use detection_data::{
    transforms::{ColorJitter, RandomAffine},
    Annotations, AugmentationPipeline, DetectionGenerator, GeneratorConfig, InMemoryDetectionDataset,
    LoaderConfig, PrefetchLoader,
};
use image::{Rgb, RgbImage};

/// Benchmarks for batch production.
///
/// This measures:
/// 1. Group production: load + augment + letterbox + assemble on the calling thread
/// 2. Epoch throughput: a full pass through `PrefetchLoader` for several worker counts
///
/// To run these, use:
/// ```bash
/// cargo bench -p detection_data
/// ```

const DATASET_SIZE: usize = 64;
const BATCH_SIZE: usize = 8;

/// Helper function to build a dataset of mixed aspect ratios, three boxes per image.
fn make_dataset(size: usize) -> InMemoryDetectionDataset {
    let entries = (0..size)
        .map(|i| {
            let (w, h) = if i % 2 == 0 { (640, 480) } else { (480, 640) };
            let image = RgbImage::from_pixel(w, h, Rgb([(i % 255) as u8, 90, 160]));
            let boxes = [
                (20.0, 20.0, 200.0, 180.0, 0),
                (220.0, 40.0, 400.0, 300.0, 1),
                (60.0, 320.0, 300.0, 460.0, 2),
            ];
            (image, Annotations::from_boxes(&boxes))
        })
        .collect();
    let classes = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    InMemoryDetectionDataset::new(entries, classes).expect("non-empty class list")
}

fn make_generator(augment: bool) -> DetectionGenerator {
    let pipeline = if augment {
        AugmentationPipeline::new()
            .with_visual_effect(ColorJitter::default())
            .with_geometric(RandomAffine::training_preset())
    } else {
        AugmentationPipeline::new()
    };
    let config = GeneratorConfig::builder()
        .batch_size(BATCH_SIZE)
        .image_size(416)
        .seed(0)
        .build();
    DetectionGenerator::new(make_dataset(DATASET_SIZE), config, pipeline).expect("valid generator")
}

/// Measure the cost of producing one group.
fn bench_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("Group Production");
    group.throughput(Throughput::Elements(BATCH_SIZE as u64));

    for augment in [false, true] {
        let generator = make_generator(augment);
        let name = if augment { "augmented" } else { "letterbox_only" };
        group.bench_function(name, |b| {
            b.iter(|| {
                let batch = generator.compute_batch(0, 0, 416).unwrap();
                black_box(batch)
            })
        });
    }
    group.finish();
}

/// Measure a full epoch through the prefetching loader.
fn bench_epoch(c: &mut Criterion) {
    let mut group = c.benchmark_group("Epoch Throughput");
    group.sample_size(10);
    group.throughput(Throughput::Elements(DATASET_SIZE as u64));

    let generator = make_generator(true);
    for num_workers in [0, 2, 4] {
        let config = LoaderConfig::builder()
            .num_workers(num_workers)
            .prefetch(2)
            .build();
        let mut loader = PrefetchLoader::new(&generator, config).unwrap();

        group.bench_with_input(
            BenchmarkId::new("workers", num_workers),
            &num_workers,
            |b, _| {
                b.iter(|| {
                    let count = loader.iter().unwrap().map(|r| r.unwrap()).count();
                    black_box(count)
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_group, bench_epoch);
criterion_main!(benches);
