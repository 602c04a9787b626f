//! Image preprocessing stages.
//!
//! Spatial and colour stages work on decoded images; `to_tensor` switches the
//! pipeline to a `[channels, height, width]` float tensor in `[0, 1]`, after
//! which only tensor stages (`normalize`) apply.

use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use rand::Rng;
use serde_yaml::Value;
use tch::{Kind, Tensor};

use fgvc_core::config::TransformConfig;
use fgvc_core::{Args, FgvcError, Registry, Result};

pub enum Frame {
    Image(DynamicImage),
    Tensor(Tensor),
}

impl Frame {
    fn kind(&self) -> &'static str {
        match self {
            Frame::Image(_) => "image",
            Frame::Tensor(_) => "tensor",
        }
    }
}

pub trait Transform: std::fmt::Debug + Send + Sync {
    fn apply(&self, frame: Frame) -> Result<Frame>;
}

pub type TransformBuilder = fn(&Args) -> Result<Box<dyn Transform>>;

pub fn register_defaults(registry: &mut Registry<TransformBuilder>) -> Result<()> {
    registry.register("resize", resize)?;
    registry.register("random_crop", random_crop)?;
    registry.register("center_crop", center_crop)?;
    registry.register("random_horizontal_flip", random_horizontal_flip)?;
    registry.register("color_jitter", color_jitter)?;
    registry.register("to_tensor", to_tensor)?;
    registry.register("normalize", normalize)?;
    Ok(())
}

/// Ordered pipeline built from the `TRANSFORMS.<split>` list.
#[derive(Debug, Default)]
pub struct Compose {
    stages: Vec<(String, Box<dyn Transform>)>,
}

impl Compose {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(registry: &Registry<TransformBuilder>, items: &[TransformConfig]) -> Result<Self> {
        let mut compose = Self::new();
        for item in items {
            let builder = registry.get(&item.name)?;
            compose.push(item.name.clone(), builder(&item.args)?);
        }
        Ok(compose)
    }

    pub fn push(&mut self, name: impl Into<String>, transform: Box<dyn Transform>) {
        self.stages.push((name.into(), transform));
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs every stage; an image still left at the end is converted as
    /// `to_tensor` would.
    pub fn apply(&self, image: DynamicImage) -> Result<Tensor> {
        let mut frame = Frame::Image(image);
        for (_, stage) in &self.stages {
            frame = stage.apply(frame)?;
        }
        match frame {
            Frame::Tensor(t) => Ok(t),
            Frame::Image(img) => Ok(image_to_tensor(&img)),
        }
    }
}

fn expect_image(stage: &str, frame: Frame) -> Result<DynamicImage> {
    match frame {
        Frame::Image(img) => Ok(img),
        other => Err(FgvcError::Config(format!("{} expects an image, got a {}", stage, other.kind()))),
    }
}

fn expect_tensor(stage: &str, frame: Frame) -> Result<Tensor> {
    match frame {
        Frame::Tensor(t) => Ok(t),
        other => Err(FgvcError::Config(format!("{} expects a tensor, got a {}", stage, other.kind()))),
    }
}

/// Zero padding on every side.
fn pad(img: &DynamicImage, padding: u32) -> DynamicImage {
    if padding == 0 {
        return img.clone();
    }
    let rgb = img.to_rgb8();
    let mut out = RgbImage::from_pixel(rgb.width() + 2 * padding, rgb.height() + 2 * padding, Rgb([0, 0, 0]));
    imageops::replace(&mut out, &rgb, padding as i64, padding as i64);
    DynamicImage::ImageRgb8(out)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResizeTarget {
    /// Match the shorter side, keep the aspect ratio.
    Shorter(u32),
    Exact { height: u32, width: u32 },
}

#[derive(Debug)]
pub struct Resize {
    target: ResizeTarget,
}

impl Transform for Resize {
    fn apply(&self, frame: Frame) -> Result<Frame> {
        let img = expect_image("resize", frame)?;
        let (width, height) = match self.target {
            ResizeTarget::Exact { height, width } => (width, height),
            ResizeTarget::Shorter(side) => {
                let (w, h) = img.dimensions();
                if w <= h {
                    (side, ((h as f64) * side as f64 / w as f64).round() as u32)
                } else {
                    (((w as f64) * side as f64 / h as f64).round() as u32, side)
                }
            }
        };
        Ok(Frame::Image(img.resize_exact(width, height, FilterType::Triangle)))
    }
}

pub fn resize(args: &Args) -> Result<Box<dyn Transform>> {
    let (height, width) = args.require_size("resize", "size")?;
    let target = match args.raw("size") {
        Some(Value::Sequence(_)) => ResizeTarget::Exact { height, width },
        _ => ResizeTarget::Shorter(height),
    };
    Ok(Box::new(Resize { target }))
}

#[derive(Debug)]
pub struct CenterCrop {
    height: u32,
    width: u32,
}

impl Transform for CenterCrop {
    fn apply(&self, frame: Frame) -> Result<Frame> {
        let mut img = expect_image("center_crop", frame)?;
        let (w, h) = img.dimensions();
        if w < self.width || h < self.height {
            let padding = (self.width.saturating_sub(w)).max(self.height.saturating_sub(h)).div_ceil(2);
            img = pad(&img, padding);
        }
        let (w, h) = img.dimensions();
        let x = (w - self.width) / 2;
        let y = (h - self.height) / 2;
        Ok(Frame::Image(img.crop_imm(x, y, self.width, self.height)))
    }
}

pub fn center_crop(args: &Args) -> Result<Box<dyn Transform>> {
    let (height, width) = args.require_size("center_crop", "size")?;
    Ok(Box::new(CenterCrop { height, width }))
}

#[derive(Debug)]
pub struct RandomCrop {
    height: u32,
    width: u32,
    padding: u32,
}

impl Transform for RandomCrop {
    fn apply(&self, frame: Frame) -> Result<Frame> {
        let img = pad(&expect_image("random_crop", frame)?, self.padding);
        let (w, h) = img.dimensions();
        if w < self.width || h < self.height {
            return Err(FgvcError::Config(format!(
                "random_crop of {}x{} does not fit a padded {}x{} image",
                self.height, self.width, h, w
            )));
        }
        let mut rng = rand::thread_rng();
        let x = rng.gen_range(0..=w - self.width);
        let y = rng.gen_range(0..=h - self.height);
        Ok(Frame::Image(img.crop_imm(x, y, self.width, self.height)))
    }
}

pub fn random_crop(args: &Args) -> Result<Box<dyn Transform>> {
    let (height, width) = args.require_size("random_crop", "size")?;
    let padding = args.i64("random_crop", "padding")?.unwrap_or(0);
    if padding < 0 {
        return Err(FgvcError::InvalidArg {
            component: "random_crop".to_string(),
            key: "padding".to_string(),
            reason: "must not be negative".to_string(),
        });
    }
    Ok(Box::new(RandomCrop {
        height,
        width,
        padding: padding as u32,
    }))
}

#[derive(Debug)]
pub struct RandomHorizontalFlip {
    prob: f64,
}

impl Transform for RandomHorizontalFlip {
    fn apply(&self, frame: Frame) -> Result<Frame> {
        let img = expect_image("random_horizontal_flip", frame)?;
        if rand::thread_rng().gen::<f64>() < self.prob {
            Ok(Frame::Image(img.fliph()))
        } else {
            Ok(Frame::Image(img))
        }
    }
}

pub fn random_horizontal_flip(args: &Args) -> Result<Box<dyn Transform>> {
    let prob = args.f64("random_horizontal_flip", "prob")?.unwrap_or(0.5);
    if !(0.0..=1.0).contains(&prob) {
        return Err(FgvcError::InvalidArg {
            component: "random_horizontal_flip".to_string(),
            key: "prob".to_string(),
            reason: format!("must be in [0, 1], got {}", prob),
        });
    }
    Ok(Box::new(RandomHorizontalFlip { prob }))
}

/// Random brightness and saturation factors drawn from `[max(0, 1 - x), 1 + x]`.
#[derive(Debug)]
pub struct ColorJitter {
    brightness: f64,
    saturation: f64,
}

fn jitter_factor(rng: &mut impl Rng, amount: f64) -> f64 {
    if amount <= 0.0 {
        1.0
    } else {
        rng.gen_range((1.0 - amount).max(0.0)..=1.0 + amount)
    }
}

impl Transform for ColorJitter {
    fn apply(&self, frame: Frame) -> Result<Frame> {
        let mut img = expect_image("color_jitter", frame)?.to_rgb8();
        let mut rng = rand::thread_rng();
        let brightness = jitter_factor(&mut rng, self.brightness);
        let saturation = jitter_factor(&mut rng, self.saturation);

        for pixel in img.pixels_mut() {
            let [r, g, b] = pixel.0.map(|c| c as f64 * brightness);
            let gray = 0.299 * r + 0.587 * g + 0.114 * b;
            let blend = |c: f64| (gray + saturation * (c - gray)).clamp(0.0, 255.0).round() as u8;
            pixel.0 = [blend(r), blend(g), blend(b)];
        }
        Ok(Frame::Image(DynamicImage::ImageRgb8(img)))
    }
}

pub fn color_jitter(args: &Args) -> Result<Box<dyn Transform>> {
    let brightness = args.f64("color_jitter", "brightness")?.unwrap_or(0.0);
    let saturation = args.f64("color_jitter", "saturation")?.unwrap_or(0.0);
    for (key, value) in [("brightness", brightness), ("saturation", saturation)] {
        if value < 0.0 {
            return Err(FgvcError::InvalidArg {
                component: "color_jitter".to_string(),
                key: key.to_string(),
                reason: "must not be negative".to_string(),
            });
        }
    }
    Ok(Box::new(ColorJitter { brightness, saturation }))
}

/// RGB image → `[3, h, w]` float tensor scaled to `[0, 1]`.
pub fn image_to_tensor(img: &DynamicImage) -> Tensor {
    let rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    Tensor::from_slice(rgb.as_raw().as_slice())
        .view([h as i64, w as i64, 3])
        .permute(&[2, 0, 1])
        .to_kind(Kind::Float)
        / 255.0
}

#[derive(Debug)]
pub struct ToTensor;

impl Transform for ToTensor {
    fn apply(&self, frame: Frame) -> Result<Frame> {
        let img = expect_image("to_tensor", frame)?;
        Ok(Frame::Tensor(image_to_tensor(&img)))
    }
}

pub fn to_tensor(_args: &Args) -> Result<Box<dyn Transform>> {
    Ok(Box::new(ToTensor))
}

#[derive(Debug)]
pub struct Normalize {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl Transform for Normalize {
    fn apply(&self, frame: Frame) -> Result<Frame> {
        let t = expect_tensor("normalize", frame)?;
        let channels = t.size().first().copied().unwrap_or(0);
        if channels != self.mean.len() as i64 {
            return Err(FgvcError::Config(format!(
                "normalize has {} channel statistics, tensor has {} channels",
                self.mean.len(),
                channels
            )));
        }
        let mean = Tensor::from_slice(&self.mean).to_kind(Kind::Float).view([-1, 1, 1]);
        let std = Tensor::from_slice(&self.std).to_kind(Kind::Float).view([-1, 1, 1]);
        Ok(Frame::Tensor((t - mean) / std))
    }
}

pub fn normalize(args: &Args) -> Result<Box<dyn Transform>> {
    let mean = args.require_f64_list("normalize", "mean")?;
    let std = args.require_f64_list("normalize", "std")?;
    if mean.len() != std.len() || mean.is_empty() {
        return Err(FgvcError::InvalidArg {
            component: "normalize".to_string(),
            key: "std".to_string(),
            reason: format!("mean has {} entries, std has {}", mean.len(), std.len()),
        });
    }
    if std.iter().any(|&s| s == 0.0) {
        return Err(FgvcError::InvalidArg {
            component: "normalize".to_string(),
            key: "std".to_string(),
            reason: "must not contain zeros".to_string(),
        });
    }
    Ok(Box::new(Normalize { mean, std }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 128])))
    }

    fn seq(values: &[u64]) -> Value {
        Value::Sequence(values.iter().map(|&v| Value::from(v)).collect())
    }

    fn registry() -> Registry<TransformBuilder> {
        let mut registry = Registry::new("transform");
        register_defaults(&mut registry).unwrap();
        registry
    }

    #[test]
    fn resize_scalar_keeps_aspect_ratio() {
        let t = resize(&Args::new().with("size", 10)).unwrap();
        let Frame::Image(img) = t.apply(Frame::Image(gradient(40, 20))).unwrap() else {
            panic!("expected an image");
        };
        assert_eq!(img.dimensions(), (20, 10));

        let t = resize(&Args::new().with("size", seq(&[8, 12]))).unwrap();
        let Frame::Image(img) = t.apply(Frame::Image(gradient(40, 20))).unwrap() else {
            panic!("expected an image");
        };
        assert_eq!(img.dimensions(), (12, 8));
    }

    #[test]
    fn center_crop_takes_the_middle() {
        let t = center_crop(&Args::new().with("size", 2)).unwrap();
        let Frame::Image(img) = t.apply(Frame::Image(gradient(6, 6))).unwrap() else {
            panic!("expected an image");
        };
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.to_rgb8().get_pixel(0, 0).0, [2, 2, 128]);
    }

    #[test]
    fn random_crop_pads_first() {
        let t = random_crop(&Args::new().with("size", 8).with("padding", 2)).unwrap();
        let Frame::Image(img) = t.apply(Frame::Image(gradient(4, 4))).unwrap() else {
            panic!("expected an image");
        };
        assert_eq!(img.dimensions(), (8, 8));

        let too_big = random_crop(&Args::new().with("size", 16)).unwrap();
        assert!(too_big.apply(Frame::Image(gradient(4, 4))).is_err());
    }

    #[test]
    fn flip_with_probability_one_mirrors() {
        let t = random_horizontal_flip(&Args::new().with("prob", 1.0)).unwrap();
        let Frame::Image(img) = t.apply(Frame::Image(gradient(4, 1))).unwrap() else {
            panic!("expected an image");
        };
        assert_eq!(img.to_rgb8().get_pixel(0, 0).0[0], 3);
    }

    #[test]
    fn pipeline_produces_normalized_chw_tensor() {
        let items: Vec<TransformConfig> = serde_yaml::from_str(
            "- {name: resize, size: [4, 6]}\n- {name: to_tensor}\n- {name: normalize, mean: [0.5, 0.5, 0.5], std: [0.5, 0.5, 0.5]}\n",
        )
        .unwrap();
        let compose = Compose::from_config(&registry(), &items).unwrap();
        assert_eq!(compose.len(), 3);

        let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 255, 255])));
        let t = compose.apply(white).unwrap();
        assert_eq!(t.size(), vec![3, 4, 6]);
        assert!((t.double_value(&[0, 0, 0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn tensor_stage_rejects_images() {
        let items: Vec<TransformConfig> =
            serde_yaml::from_str("- {name: normalize, mean: [0.5], std: [0.5]}\n").unwrap();
        let compose = Compose::from_config(&registry(), &items).unwrap();
        assert!(compose.apply(gradient(2, 2)).is_err());
    }

    #[test]
    fn unknown_transform_is_not_found() {
        let items: Vec<TransformConfig> = serde_yaml::from_str("- {name: rotate}\n").unwrap();
        let err = Compose::from_config(&registry(), &items).unwrap_err();
        assert!(matches!(err, FgvcError::NotFound { .. }));
    }
}
