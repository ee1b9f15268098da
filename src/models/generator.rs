//! Generator stack shared by the built-in trainers and runners: a
//! conditioned foreground network plus an optional background network whose
//! outputs are summed.

use rand::Rng;

use crate::error::{ModelError, ModelResult};
use crate::models::lifecycle::{Batch, Visuals};
use crate::models::network::{ConvNet, Network};
use crate::tensor::Tensor;

pub const IMAGE_NC: usize = 3;

/// Width of the hidden layer of every built-in network.
pub const HIDDEN_NC: usize = 16;

/// Batch entries a network reads, concatenated in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    /// Source appearance image.
    SrcImg,
    /// Conditioning maps of the target pose.
    SrcCond,
    /// Masked background image.
    BgImg,
    /// Foreground mask of the background image.
    BgMask,
}

impl Input {
    pub fn key(self) -> &'static str {
        match self {
            Input::SrcImg => "src_img",
            Input::SrcCond => "src_cond",
            Input::BgImg => "bg_img",
            Input::BgMask => "bg_mask",
        }
    }

    pub fn channels(self, cond_nc: usize) -> usize {
        match self {
            Input::SrcImg | Input::BgImg => IMAGE_NC,
            Input::SrcCond => cond_nc,
            Input::BgMask => 1,
        }
    }
}

/// Key of the supervision image.
pub const TARGET_KEY: &str = "tgt_img";

pub fn input_channels(inputs: &[Input], cond_nc: usize) -> usize {
    inputs.iter().map(|i| i.channels(cond_nc)).sum()
}

/// Concatenate the `[n, c, h, w]` entries named by `inputs` along channels.
/// Every entry must share batch size and spatial size with the first one.
pub fn gather(
    batch: &Batch,
    inputs: &[Input],
    device: &candle_core::Device,
) -> ModelResult<Tensor> {
    let mut parts = Vec::with_capacity(inputs.len());
    let mut layout: Option<(usize, usize, usize)> = None;
    for input in inputs {
        let tensor = batch.get(input.key())?;
        let (n, c, h, w) = tensor.dims4()?;
        match layout {
            Some((en, eh, ew)) if (en, eh, ew) != (n, h, w) => {
                return Err(ModelError::shape_mismatch(
                    input.key(),
                    &[en, c, eh, ew],
                    tensor.dims(),
                ));
            }
            Some(_) => {}
            None => layout = Some((n, h, w)),
        }
        parts.push(tensor.to_device(device)?);
    }
    Ok(Tensor::cat(&parts, 1)?)
}

/// Background branch of a [`Generator`].
pub struct Background {
    pub net: ConvNet,
    pub inputs: &'static [Input],
    pub trainable: bool,
}

/// Outputs of one generator pass.
#[derive(Debug, Clone)]
pub struct GeneratorPass {
    pub output: Tensor,
    pub bg_output: Option<Tensor>,
}

pub struct Generator {
    pub net: ConvNet,
    pub inputs: &'static [Input],
    pub background: Option<Background>,
    device: candle_core::Device,
}

impl Generator {
    pub fn new<R: Rng>(
        inputs: &'static [Input],
        background: Option<(&'static [Input], bool)>,
        cond_nc: usize,
        device: &candle_core::Device,
        rng: &mut R,
    ) -> ModelResult<Self> {
        let net = ConvNet::new(
            "Generator",
            &[input_channels(inputs, cond_nc), HIDDEN_NC, IMAGE_NC],
            device,
            rng,
        )?;
        let background = match background {
            Some((bg_inputs, trainable)) => {
                let mut net = ConvNet::new(
                    "BackgroundInpaintor",
                    &[input_channels(bg_inputs, cond_nc), HIDDEN_NC, IMAGE_NC],
                    device,
                    rng,
                )?;
                net.set_training(trainable);
                Some(Background {
                    net,
                    inputs: bg_inputs,
                    trainable,
                })
            }
            None => None,
        };
        Ok(Self {
            net,
            inputs,
            background,
            device: device.clone(),
        })
    }

    pub fn device(&self) -> &candle_core::Device {
        &self.device
    }

    /// Foreground output plus background output. A frozen background is
    /// detached from the graph.
    pub fn forward(&self, batch: &Batch) -> ModelResult<GeneratorPass> {
        let foreground = self.net.forward(&gather(batch, self.inputs, &self.device)?)?;

        match &self.background {
            Some(bg) => {
                let mut out = bg.net.forward(&gather(batch, bg.inputs, &self.device)?)?;
                if !bg.trainable {
                    out = out.detach();
                }
                if out.dims() != foreground.dims() {
                    return Err(ModelError::shape_mismatch(
                        "fake_bg",
                        foreground.dims(),
                        out.dims(),
                    ));
                }
                Ok(GeneratorPass {
                    output: (&foreground + &out)?,
                    bg_output: Some(out),
                })
            }
            None => Ok(GeneratorPass {
                output: foreground,
                bg_output: None,
            }),
        }
    }

    /// Switch modes; a frozen background always stays in evaluation mode.
    pub fn set_training(&mut self, training: bool) {
        self.net.set_training(training);
        if let Some(bg) = &mut self.background {
            bg.net.set_training(training && bg.trainable);
        }
    }

    pub fn networks(&self) -> Vec<(&'static str, &dyn Network)> {
        let mut nets: Vec<(&'static str, &dyn Network)> = vec![("G", &self.net)];
        if let Some(bg) = &self.background {
            nets.push(("bg", &bg.net));
        }
        nets
    }

    pub fn networks_mut(&mut self) -> Vec<(&'static str, &mut dyn Network)> {
        let mut nets: Vec<(&'static str, &mut dyn Network)> = vec![("G", &mut self.net)];
        if let Some(bg) = &mut self.background {
            nets.push(("bg", &mut bg.net));
        }
        nets
    }
}

/// Inputs present in `batch` plus the generated images of `pass`.
pub fn pass_visuals(batch: &Batch, pass: &GeneratorPass) -> Visuals {
    let mut visuals: Visuals = batch
        .tensors
        .iter()
        .filter(|(key, _)| key.ends_with("_img"))
        .map(|(key, t)| (key.clone(), t.clone()))
        .collect();
    visuals.insert("fake_img".to_string(), pass.output.detach());
    if let Some(bg) = &pass.bg_output {
        visuals.insert("fake_bg".to_string(), bg.detach());
    }
    visuals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{host_values, DType};
    use candle_core::Device;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const G_INPUTS: &[Input] = &[Input::SrcImg, Input::SrcCond];
    const BG_INPUTS: &[Input] = &[Input::BgImg, Input::BgMask];

    fn full(value: f32, c: usize, side: usize) -> Tensor {
        Tensor::full(value, (1, c, side, side), &Device::Cpu).unwrap()
    }

    fn batch(cond_nc: usize, side: usize) -> Batch {
        Batch::new()
            .with_tensor("src_img", full(0.5, 3, side))
            .with_tensor("src_cond", full(1.0, cond_nc, side))
            .with_tensor("bg_img", full(-0.5, 3, side))
            .with_tensor("bg_mask", full(1.0, 1, side))
    }

    fn generator(trainable_bg: Option<bool>) -> Generator {
        let mut rng = StdRng::seed_from_u64(5);
        let background = trainable_bg.map(|t| (BG_INPUTS, t));
        Generator::new(G_INPUTS, background, 2, &Device::Cpu, &mut rng).unwrap()
    }

    #[test]
    fn test_output_is_sum_of_branches() {
        let generator = generator(Some(true));
        let batch = batch(2, 4);
        let pass = generator.forward(&batch).unwrap();
        assert_eq!(pass.output.dims(), &[1, 3, 4, 4]);

        let g_input = gather(&batch, G_INPUTS, &Device::Cpu).unwrap();
        assert_eq!(g_input.dims(), &[1, 5, 4, 4]);
        let g_only = generator.net.forward(&g_input).unwrap();
        let expected = (g_only + pass.bg_output.as_ref().unwrap()).unwrap();
        let diff = (&pass.output - &expected).unwrap().abs().unwrap();
        let (_, values) = host_values(&diff).unwrap();
        assert!(values.iter().all(|v| *v < 1e-6));
    }

    #[test]
    fn test_background_size_must_match() {
        let generator = generator(Some(false));
        let batch = Batch::new()
            .with_tensor("src_img", full(0.1, 3, 2))
            .with_tensor("src_cond", full(0.2, 2, 2))
            .with_tensor("bg_img", full(0.3, 3, 3))
            .with_tensor("bg_mask", full(1.0, 1, 3));
        match generator.forward(&batch) {
            Err(ModelError::ShapeMismatch { expected, actual, .. }) => {
                assert_eq!(expected, vec![1, 3, 2, 2]);
                assert_eq!(actual, vec![1, 3, 3, 3]);
            }
            other => panic!("expected ShapeMismatch, got {:?}", other.map(|p| p.output.dims().to_vec())),
        }
    }

    #[test]
    fn test_inputs_must_share_spatial_size() {
        let batch = batch(2, 4).with_tensor("src_cond", full(1.0, 2, 3));
        assert!(matches!(
            gather(&batch, G_INPUTS, &Device::Cpu),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_frozen_background_stays_in_eval() {
        let mut generator = generator(Some(false));
        generator.set_training(true);
        assert!(generator.net.is_training());
        assert!(!generator.background.as_ref().unwrap().net.is_training());
    }

    #[test]
    fn test_missing_input_is_reported() {
        let generator = generator(None);
        let partial = Batch::new().with_tensor(
            "src_img",
            Tensor::zeros((1, 3, 2, 2), DType::F32, &Device::Cpu).unwrap(),
        );
        assert!(matches!(
            generator.forward(&partial),
            Err(ModelError::MissingInput(_))
        ));
    }
}
