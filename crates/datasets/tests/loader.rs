use std::fs;
use std::path::Path;

use fgvc_core::config::TransformConfig;
use fgvc_core::{Args, Registry};
use image::{Rgb, RgbImage};

use datasets::image_folder::ImageFolder;
use datasets::samplers::{self, SamplerBuilder};
use datasets::transforms::{self, TransformBuilder};
use datasets::{Compose, DataLoader, FgvcDataset, Split};

fn png(path: &Path, width: u32, height: u32, shade: u8) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbImage::from_pixel(width, height, Rgb([shade, shade, shade])).save(path).unwrap();
}

/// `train/{cat,dog}` with three and two images of mixed sizes.
fn folder(root: &Path) {
    png(&root.join("train/cat/0.png"), 12, 10, 10);
    png(&root.join("train/cat/1.png"), 9, 9, 20);
    png(&root.join("train/cat/2.png"), 16, 8, 30);
    png(&root.join("train/dog/0.png"), 10, 12, 40);
    png(&root.join("train/dog/1.png"), 8, 8, 50);
    fs::write(root.join("train/dog/notes.txt"), "ignored").unwrap();
}

fn pipeline() -> Compose {
    let mut registry: Registry<TransformBuilder> = Registry::new("transform");
    transforms::register_defaults(&mut registry).unwrap();
    let items = vec![
        TransformConfig {
            name: "resize".to_string(),
            args: Args::new().with("size", vec![8, 8]),
        },
        TransformConfig {
            name: "to_tensor".to_string(),
            args: Args::new(),
        },
    ];
    Compose::from_config(&registry, &items).unwrap()
}

fn sampler(name: &str, args: Args) -> datasets::Sampler {
    let mut registry: Registry<SamplerBuilder> = Registry::new("sampler");
    samplers::register_defaults(&mut registry).unwrap();
    registry.get(name).unwrap()(&args).unwrap()
}

#[test]
fn image_folder_sorts_categories_and_skips_non_images() {
    let dir = tempfile::tempdir().unwrap();
    folder(dir.path());

    let dataset = ImageFolder::new(dir.path(), Split::Train).unwrap();

    assert_eq!(dataset.len(), 5);
    assert_eq!(dataset.categories().names(), vec!["cat", "dog"]);
    assert_eq!(dataset.labels(), vec![0, 0, 0, 1, 1]);
}

#[test]
fn sequential_batches_keep_order_and_shape() {
    let dir = tempfile::tempdir().unwrap();
    folder(dir.path());
    let dataset = Box::new(ImageFolder::new(dir.path(), Split::Train).unwrap());

    let mut loader = DataLoader::new(dataset, pipeline(), sampler("sequential_sampler", Args::new()), 2, 0, false).unwrap();

    assert_eq!(loader.len(), 3);
    let batches: Vec<_> = loader.iter().collect::<Result<_, _>>().unwrap();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].images.size(), vec![2, 3, 8, 8]);
    assert_eq!(Vec::<i64>::try_from(&batches[1].labels).unwrap(), vec![0, 1]);
    assert_eq!(batches[2].len(), 1);
}

#[test]
fn worker_pool_yields_every_sample_once() {
    let dir = tempfile::tempdir().unwrap();
    folder(dir.path());
    let dataset = Box::new(ImageFolder::new(dir.path(), Split::Train).unwrap());

    let mut loader =
        DataLoader::new(dataset, pipeline(), sampler("random_sampler", Args::new().with("seed", 3)), 4, 2, false).unwrap();

    let mut paths: Vec<_> = loader
        .iter()
        .map(|b| b.unwrap().paths)
        .flatten()
        .collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), 5);
}

#[test]
fn balanced_sampler_sets_batch_count() {
    let dir = tempfile::tempdir().unwrap();
    folder(dir.path());
    let dataset = Box::new(ImageFolder::new(dir.path(), Split::Train).unwrap());
    let args = Args::new().with("classes_per_batch", 2).with("samples_per_class", 2);

    let mut loader = DataLoader::new(dataset, pipeline(), sampler("class_balanced_batch_sampler", args), 0, 0, false).unwrap();

    assert_eq!(loader.len(), 1);
    let batch = loader.iter().next().unwrap().unwrap();
    assert_eq!(batch.images.size()[0], 4);
}

#[test]
fn unreadable_image_surfaces_as_error() {
    let dir = tempfile::tempdir().unwrap();
    folder(dir.path());
    fs::write(dir.path().join("train/cat/3.png"), b"not a png").unwrap();
    let dataset = Box::new(ImageFolder::new(dir.path(), Split::Train).unwrap());

    let mut loader = DataLoader::new(dataset, pipeline(), sampler("sequential_sampler", Args::new()), 8, 0, false).unwrap();

    let result = loader.iter().next().unwrap();
    assert!(matches!(result, Err(fgvc_core::FgvcError::Image(_))));
}
