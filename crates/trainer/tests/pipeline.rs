use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;

use indoc::indoc;
use tch::{nn, nn::ModuleT, Device, Kind, Tensor};

use datasets::Batch;
use fgvc_core::config::{LrConfig, WeightConfig};
use fgvc_core::{checkpoint, ComponentTag, FgvcError, FgvcModel, RootConfig};
use trainer::build;
use trainer::interpreter::{saliency_map, Interpreter};
use trainer::logger::{ConsoleLogger, Logger};
use trainer::optim::param_groups;
use trainer::save::{prepare_save_dir, save_model};
use trainer::update::{general_update, vit_update_strategy, LossScaler, StepOptions, ITER_LOSS};
use trainer::{Registries, Trainer};

const CONFIG: &str = indoc! {r#"
    EXP_NAME: "tiny"
    EPOCH_NUM: 1
    MODEL:
      CLASS_NUM: 2
      BACKBONE:
        NAME: "resnet18"
      ENCODER:
        NAME: "global_avg_pooling"
      HEADS:
        NAME: "classifier_1fc"
      CRITERIONS:
        - name: "cross_entropy_loss"
    DATASET:
      NAME: "image_folder"
      ROOT: "@ROOT@/data"
      TRAIN:
        BATCH_SIZE: 2
      TEST:
        BATCH_SIZE: 2
    TRANSFORMS:
      TRAIN:
        - name: "resize"
          size: [64, 64]
        - name: "to_tensor"
      TEST:
        - name: "resize"
          size: [64, 64]
    OPTIMIZER:
      NAME: "sgd"
      ARGS:
        - momentum: 0.9
      LR:
        backbone: 0.01
        base: 0.001
    METRICS:
      - name: "top1"
        metric: "accuracy"
    LOGGER:
      NAME: "txt_logger"
      FILE_PATH: "@ROOT@/logs"
    WEIGHT:
      NAME: "tiny.ot"
      SAVE_DIR: "@ROOT@/ckpt"
"#};

fn config(root: &Path) -> RootConfig {
    RootConfig::from_yaml(&CONFIG.replace("@ROOT@", &root.to_string_lossy())).unwrap()
}

fn registries() -> Registries {
    Registries::with_defaults().unwrap()
}

fn image_tree(root: &Path) {
    for split in ["train", "test"] {
        for (class, shade) in [("crow", 30u8), ("gull", 220u8)] {
            for i in 0..2 {
                let path = root.join("data").join(split).join(class).join(format!("{}.png", i));
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                image::RgbImage::from_pixel(40, 40, image::Rgb([shade, shade, shade]))
                    .save(path)
                    .unwrap();
            }
        }
    }
}

fn batch() -> Batch {
    Batch {
        images: Tensor::randn(&[2, 3, 64, 64], (Kind::Float, Device::Cpu)),
        labels: Tensor::from_slice(&[0i64, 1]),
        paths: vec!["a.png".into(), "b.png".into()],
    }
}

fn weight(model: &FgvcModel, name: &str) -> Tensor {
    model.vs().variables()[name].copy()
}

/// Keeps every line for inspection.
#[derive(Default)]
struct RecordingLogger {
    lines: Vec<String>,
}

impl Logger for RecordingLogger {
    fn log(&mut self, msg: &str) {
        self.lines.push(msg.to_string());
    }

    fn add_scalars(&mut self, _step: usize, _scalars: &BTreeMap<String, f64>) {}

    fn close(&mut self) {}
}

#[test]
fn registries_cover_every_category() {
    let r = registries();
    let catalog = r.catalog();
    assert_eq!(catalog.len(), 16);
    assert!(catalog.iter().all(|(_, names)| !names.is_empty()));
    assert!(r.backbones.contains("resnet50"));
    assert!(r.update_functions.contains("vit_update_strategy"));
}

#[test]
fn unknown_backbone_is_a_lookup_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path()).model;
    cfg.backbone.name = "resnet1000".to_string();

    let err = build::build_model(&registries(), &cfg, Device::Cpu).unwrap_err();
    assert!(matches!(err, FgvcError::NotFound { ref category, ref name } if category == "backbone" && name == "resnet1000"));
}

#[test]
fn encoder_is_optional() {
    let dir = tempfile::tempdir().unwrap();
    let r = registries();
    let mut cfg = config(dir.path()).model;

    let with_encoder = build::build_model(&r, &cfg, Device::Cpu).unwrap();
    assert!(with_encoder.encoder().is_some());

    cfg.encoder.name = String::new();
    let without = build::build_model(&r, &cfg, Device::Cpu).unwrap();
    assert!(without.encoder().is_none());
    assert!(without.necks().is_none());

    let logits = without.forward_t(&Tensor::randn(&[2, 3, 64, 64], (Kind::Float, Device::Cpu)), false);
    assert_eq!(logits.size(), vec![2, 2]);
}

#[test]
fn neck_changes_head_input_width() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path()).model;
    cfg.necks.name = "conv_projection".to_string();
    cfg.necks.args = fgvc_core::Args::new().with("out_channels", 32);

    let model = build::build_model(&registries(), &cfg, Device::Cpu).unwrap();
    let variables = model.vs().variables();
    assert_eq!(variables["heads.fc.weight"].size(), vec![2, 32]);
    assert!(variables.contains_key("necks.conv.weight"));
}

#[test]
fn learning_rates_follow_component_tags() {
    let dir = tempfile::tempdir().unwrap();
    let r = registries();
    let cfg = config(dir.path());
    let mut model = build::build_model(&r, &cfg.model, Device::Cpu).unwrap();
    // A top-level name that merely looks like a component is not one.
    let _ = model.vs_mut().root().sub("head").sub("fc").var("weight", &[2, 2], nn::Init::Const(0.0));

    let groups = param_groups(&model, &cfg.optimizer.lr);
    let lr_of = |name: &str| groups.iter().find(|g| g.name == name).map(|g| (g.tag, g.lr));
    assert_eq!(lr_of("backbone.conv1.weight"), Some((ComponentTag::Backbone, 0.01)));
    assert_eq!(lr_of("heads.fc.weight"), Some((ComponentTag::Heads, 0.001)));
    assert_eq!(lr_of("head.fc.weight"), Some((ComponentTag::Base, 0.001)));
    assert_eq!(groups.iter().filter(|g| g.name == "head.fc.weight").count(), 1);

    let mut optimizer = build::build_optimizer(&r, &cfg.optimizer, &model).unwrap();
    assert_eq!(optimizer.lr(ComponentTag::Backbone), Some(0.01));
    assert_eq!(optimizer.lr(ComponentTag::Encoder), None);
    optimizer.set_lr_factor(0.5);
    assert_eq!(optimizer.lr(ComponentTag::Backbone), Some(0.005));
    assert_eq!(optimizer.base_lr(ComponentTag::Heads), Some(0.001));
}

#[test]
fn wrapped_model_groups_like_the_inner_one() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let model = build::build_model(&registries(), &cfg.model, Device::Cpu).unwrap();
    let plain = param_groups(&model, &cfg.optimizer.lr);

    let wrapped = fgvc_core::DataParallel::new(model, vec![Device::Cpu]);
    assert_eq!(param_groups(&wrapped, &cfg.optimizer.lr), plain);
}

#[test]
fn update_step_reports_each_loss_and_moves_weights() {
    let dir = tempfile::tempdir().unwrap();
    let r = registries();
    let cfg = config(dir.path());
    let model = build::build_model(&r, &cfg.model, Device::Cpu).unwrap();
    let mut optimizer = build::build_optimizer(&r, &cfg.optimizer, &model).unwrap();
    let update = build::build_update_function(&r, &cfg).unwrap();

    let before = weight(&model, "heads.fc.weight");
    let losses = update(&model, &batch(), &mut optimizer, &mut StepOptions::default()).unwrap();

    assert!(losses.contains_key("cross_entropy_loss"));
    assert!(losses[ITER_LOSS].is_finite());
    let after = &model.vs().variables()["heads.fc.weight"];
    assert!(!after.equal(&before));
}

#[test]
fn zero_backbone_rate_freezes_only_the_backbone() {
    let dir = tempfile::tempdir().unwrap();
    let r = registries();
    let mut cfg = config(dir.path());
    cfg.optimizer.lr = LrConfig {
        backbone: Some(0.0),
        base: 0.5,
        ..Default::default()
    };
    let model = build::build_model(&r, &cfg.model, Device::Cpu).unwrap();
    let mut optimizer = build::build_optimizer(&r, &cfg.optimizer, &model).unwrap();

    let backbone = weight(&model, "backbone.conv1.weight");
    let heads = weight(&model, "heads.fc.weight");
    general_update(&model, &batch(), &mut optimizer, &mut StepOptions::default()).unwrap();

    assert!(weight(&model, "backbone.conv1.weight").equal(&backbone));
    assert!(!weight(&model, "heads.fc.weight").equal(&heads));
}

#[test]
fn vit_strategy_bounds_the_step_by_the_clipped_norm() {
    let dir = tempfile::tempdir().unwrap();
    let r = registries();
    let mut cfg = config(dir.path());
    cfg.optimizer.args = fgvc_core::Args::new();
    cfg.optimizer.lr = LrConfig {
        base: 0.1,
        ..Default::default()
    };
    let model = build::build_model(&r, &cfg.model, Device::Cpu).unwrap();
    let mut optimizer = build::build_optimizer(&r, &cfg.optimizer, &model).unwrap();

    let before: Vec<(String, Tensor)> = model.named_parameters().into_iter().map(|(name, _, t)| (name, t.copy())).collect();
    let losses = vit_update_strategy(&model, &batch(), &mut optimizer, &mut StepOptions::default()).unwrap();
    assert!(losses[ITER_LOSS].is_finite());

    // Plain SGD moves by lr * grad, and the gradient norm is at most 1.
    let after = model.vs().variables();
    let moved: f64 = before
        .iter()
        .map(|(name, t)| (&after[name] - t).square().sum(Kind::Double).double_value(&[]))
        .sum::<f64>()
        .sqrt();
    assert!(moved > 0.0);
    assert!(moved <= 0.1 + 1e-4, "moved {}", moved);
}

#[test]
fn scaled_step_applies_finite_gradients() {
    let dir = tempfile::tempdir().unwrap();
    let r = registries();
    let cfg = config(dir.path());
    let model = build::build_model(&r, &cfg.model, Device::Cpu).unwrap();
    let mut optimizer = build::build_optimizer(&r, &cfg.optimizer, &model).unwrap();
    let mut options = StepOptions {
        clip_grad: None,
        scaler: Some(LossScaler::default()),
    };

    let before = weight(&model, "heads.fc.weight");
    let losses = general_update(&model, &batch(), &mut optimizer, &mut options).unwrap();

    assert!(losses[ITER_LOSS].is_finite());
    assert!(!weight(&model, "heads.fc.weight").equal(&before));
    assert_eq!(options.scaler.unwrap().scale(), 65536.0);
}

#[test]
fn overflowing_scaled_step_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let r = registries();
    let cfg = config(dir.path());
    let model = build::build_model(&r, &cfg.model, Device::Cpu).unwrap();
    let mut optimizer = build::build_optimizer(&r, &cfg.optimizer, &model).unwrap();
    // The scaled f32 loss overflows to infinity.
    let mut options = StepOptions {
        clip_grad: None,
        scaler: Some(LossScaler::with_scale(f64::MAX)),
    };

    let heads = weight(&model, "heads.fc.weight");
    let backbone = weight(&model, "backbone.conv1.weight");
    general_update(&model, &batch(), &mut optimizer, &mut options).unwrap();

    assert!(weight(&model, "heads.fc.weight").equal(&heads));
    assert!(weight(&model, "backbone.conv1.weight").equal(&backbone));
    assert_eq!(options.scaler.unwrap().scale(), f64::MAX * 0.5);
}

#[test]
fn saliency_is_normalized_per_image_and_clears_gradients() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let model = build::build_model(&registries(), &cfg.model, Device::Cpu).unwrap();
    let images = Tensor::randn(&[2, 3, 64, 64], (Kind::Float, Device::Cpu));

    let interpretation = saliency_map(&fgvc_core::Args::new()).unwrap().interpret(&model, &images).unwrap();

    let saliency = &interpretation.saliency;
    assert_eq!(saliency.size(), vec![2, 64, 64]);
    assert!(saliency.min().double_value(&[]) >= 0.0);
    assert!(saliency.max().double_value(&[]) <= 1.0 + 1e-6);
    let expected = tch::no_grad(|| model.forward_t(&images, false)).argmax(1, false);
    assert!(interpretation.predictions.equal(&expected));

    for (name, _, var) in model.named_parameters() {
        let grad = var.grad();
        assert!(!grad.defined() || grad.abs().sum(Kind::Double).double_value(&[]) == 0.0, "{} keeps a gradient", name);
    }
}

#[test]
fn checkpoint_round_trip_restores_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let r = registries();
    let cfg = config(dir.path());
    let source = build::build_model(&r, &cfg.model, Device::Cpu).unwrap();
    let mut target = build::build_model(&r, &cfg.model, Device::Cpu).unwrap();

    let weight = WeightConfig {
        name: "tiny.ot".to_string(),
        save_dir: dir.path().join("ckpt").to_string_lossy().into_owned(),
        load: None,
    };
    let path = save_model(&weight, &source, &mut ConsoleLogger).unwrap().unwrap();
    assert!(dir.path().join("ckpt/tiny.ot.json").exists());

    checkpoint::load(target.vs_mut(), &path).unwrap();
    let restored = target.vs().variables();
    for (name, tensor) in source.vs().variables() {
        assert!(tensor.equal(&restored[&name]), "{} differs", name);
    }
    assert_eq!(checkpoint::load_config(&path).unwrap().class_num, 2);
}

#[test]
fn empty_weight_name_disables_saving() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let model = build::build_model(&registries(), &cfg.model, Device::Cpu).unwrap();
    let weight = WeightConfig {
        name: String::new(),
        ..cfg.weight.clone()
    };

    assert_eq!(save_model(&weight, &model, &mut ConsoleLogger).unwrap(), None);
    assert!(!dir.path().join("ckpt").exists());
}

#[test]
fn save_dir_under_a_file_cannot_be_created() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    fs::write(&blocker, "x").unwrap();

    assert!(prepare_save_dir(&blocker.join("ckpt")).is_err());
    assert!(prepare_save_dir(&dir.path().join("a/b")).is_ok());
    assert!(dir.path().join("a/b").is_dir());
}

#[test]
fn failed_checkpoint_write_is_not_logged_as_saved() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let model = build::build_model(&registries(), &cfg.model, Device::Cpu).unwrap();
    // The checkpoint path is taken by a directory.
    fs::create_dir_all(dir.path().join("ckpt/tiny.ot")).unwrap();

    let mut logger = RecordingLogger::default();
    assert!(save_model(&cfg.weight, &model, &mut logger).is_err());
    assert!(logger.lines.iter().all(|l| !l.contains("Saving checkpoint")));
}

#[test]
fn uncreatable_save_dir_ends_the_run_with_status_1() {
    let dir = tempfile::tempdir().unwrap();
    image_tree(dir.path());
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, "x").unwrap();

    let yaml = CONFIG
        .replace("@ROOT@/ckpt", &blocker.join("ckpt").to_string_lossy())
        .replace("@ROOT@", &dir.path().to_string_lossy());
    let config_path = dir.path().join("run.yaml");
    fs::write(&config_path, yaml).unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_fgvc-train"))
        .arg("train")
        .arg("--config")
        .arg(&config_path)
        .status()
        .unwrap();

    assert_eq!(status.code(), Some(1));
    let log = fs::read_to_string(dir.path().join("logs/tiny.txt")).unwrap();
    assert!(log.contains("Cannot create save dir under"));
    assert!(!dir.path().join("blocker/ckpt").exists());
}

#[test]
fn one_epoch_trains_evaluates_and_saves() {
    let dir = tempfile::tempdir().unwrap();
    image_tree(dir.path());
    let cfg = config(dir.path());

    let mut trainer = Trainer::new(cfg, &registries()).unwrap();
    let saved = trainer.train().unwrap();
    let results: BTreeMap<String, f64> = trainer.evaluate().unwrap();
    trainer.close();

    assert_eq!(saved, Some(dir.path().join("ckpt/tiny.ot")));
    assert!(dir.path().join("ckpt/tiny.ot").exists());
    assert!((0.0..=1.0).contains(&results["top1"]));
    let log = fs::read_to_string(dir.path().join("logs/tiny.txt")).unwrap();
    assert!(log.contains("Saving checkpoint to"));
}
