use crate::common::*;

/// Weight initialization scheme for convolution layers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    AsRefStr,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InitKind {
    /// Gaussian with zero mean and `gain` as the standard deviation.
    Normal,
    /// Glorot normal scaled by `gain`.
    Xavier,
    /// He normal in fan-in mode. `gain` is not used.
    Kaiming,
    /// A (semi-)orthogonal matrix scaled by `gain`.
    Orthogonal,
}

impl InitKind {
    pub fn from_name(name: &str) -> Result<Self> {
        Self::from_str(name)
            .map_err(|_| format_err!("initialization method [{}] is not implemented", name))
    }
}

/// The role of a variable, recognized by its path in the var store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayerParam {
    ConvWeight,
    NormWeight,
    NormBias,
}

impl LayerParam {
    fn from_path(path: &str) -> Option<Self> {
        let mut segments = path.rsplit('.');
        let leaf = segments.next()?;
        let parent = segments.next()?.to_lowercase();

        // whole `_`-separated tokens with layer numbers stripped, e.g. `conv3_bn` -> [conv, bn]
        let tokens: Vec<&str> = parent
            .split('_')
            .map(|token| token.trim_end_matches(|c: char| c.is_ascii_digit()))
            .collect();
        let is_norm = tokens
            .iter()
            .any(|&token| token == "bn" || token == "batchnorm")
            || tokens.windows(2).any(|pair| pair == ["batch", "norm"]);
        let is_conv = tokens.iter().any(|&token| token == "conv");

        if is_norm {
            match leaf {
                "weight" => Some(Self::NormWeight),
                "bias" => Some(Self::NormBias),
                _ => None,
            }
        } else if is_conv && leaf == "weight" {
            Some(Self::ConvWeight)
        } else {
            None
        }
    }
}

/// Initialize the convolution and batch normalization layers in a var store.
///
/// The parent path segment of each variable is split on `_` into tokens,
/// ignoring trailing layer numbers. Convolution weights are `*.weight`
/// variables with a `conv` token. Variables with a `bn`, `batchnorm` or
/// `batch_norm` token are normalization parameters, which get weights drawn
/// from `N(1, 0.02)` and zero biases. Other variables are left untouched.
pub fn weights_init(vs: &nn::VarStore, kind: InitKind, gain: f64) -> Result<()> {
    ensure!(
        gain.is_finite() && gain > 0.0,
        "init gain must be positive, but get {}",
        gain
    );

    let mut variables: Vec<_> = vs.variables().into_iter().collect();
    variables.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));

    let mut num_conv = 0;
    let mut num_norm = 0;

    tch::no_grad(|| -> Result<()> {
        for (name, mut var) in variables {
            let param = match LayerParam::from_path(&name) {
                Some(param) => param,
                None => continue,
            };

            match param {
                LayerParam::ConvWeight => {
                    init_conv_weight(&mut var, kind, gain)
                        .with_context(|| format!("unable to initialize '{}'", name))?;
                    num_conv += 1;
                }
                LayerParam::NormWeight => {
                    let _ = var.normal_(1.0, 0.02);
                    num_norm += 1;
                }
                LayerParam::NormBias => {
                    let _ = var.fill_(0.0);
                }
            }
        }
        Ok(())
    })?;

    info!(
        "initialize network with {} type: {} convolution and {} normalization layers",
        kind, num_conv, num_norm
    );
    Ok(())
}

fn init_conv_weight(weight: &mut Tensor, kind: InitKind, gain: f64) -> Result<()> {
    let size = weight.size();
    ensure!(
        size.len() >= 2,
        "expect a weight of at least 2 dimensions, but get shape {:?}",
        size
    );
    let receptive_field: i64 = size[2..].iter().product();
    let fan_in = (size[1] * receptive_field) as f64;
    let fan_out = (size[0] * receptive_field) as f64;

    match kind {
        InitKind::Normal => {
            let _ = weight.normal_(0.0, gain);
        }
        InitKind::Xavier => {
            let std = gain * (2.0 / (fan_in + fan_out)).sqrt();
            let _ = weight.normal_(0.0, std);
        }
        InitKind::Kaiming => {
            let std = (2.0 / fan_in).sqrt();
            let _ = weight.normal_(0.0, std);
        }
        InitKind::Orthogonal => {
            let orthogonal = orthogonal_like(weight)? * gain;
            weight.copy_(&orthogonal);
        }
    }

    Ok(())
}

/// A random matrix of the weight's shape whose flattened rows or columns are orthonormal.
fn orthogonal_like(weight: &Tensor) -> Result<Tensor> {
    let size = weight.size();
    let rows = size[0];
    let cols = weight.numel() as i64 / rows;
    ensure!(rows > 0 && cols > 0, "cannot orthogonalize an empty weight");

    let flat = Tensor::randn(&[rows, cols], (Kind::Double, Device::Cpu));
    let flat = if rows < cols { flat.tr() } else { flat };

    let (q, r) = flat.linalg_qr("reduced");
    // make the decomposition unique
    let q = q * r.diag(0).sign();
    let q = if rows < cols { q.tr() } else { q };

    Ok(q
        .contiguous()
        .view(size.as_slice())
        .to_kind(weight.kind())
        .to_device(weight.device()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn build_net(vs: &nn::VarStore) {
        let root = vs.root();
        let _ = nn::conv2d(&root / "conv1", 3, 8, 3, Default::default());
        let _ = nn::batch_norm2d(&root / "bn1", 8, Default::default());
        let _ = nn::conv2d(&(&root / "block") / "conv2", 8, 16, 3, Default::default());
        let _ = nn::conv2d(&(&root / "head") / "subnet_conv", 16, 4, 1, Default::default());
        let _ = nn::linear(&root / "fc", 16, 4, Default::default());
    }

    fn variable(vs: &nn::VarStore, name: &str) -> Tensor {
        vs.variables()
            .remove(name)
            .unwrap_or_else(|| panic!("missing variable {}", name))
    }

    #[test]
    fn recognize_layers() {
        assert_eq!(
            LayerParam::from_path("backbone.conv1.weight"),
            Some(LayerParam::ConvWeight)
        );
        assert_eq!(LayerParam::from_path("backbone.conv1.bias"), None);
        assert_eq!(LayerParam::from_path("bn1.weight"), Some(LayerParam::NormWeight));
        assert_eq!(
            LayerParam::from_path("head.batch_norm.bias"),
            Some(LayerParam::NormBias)
        );
        assert_eq!(LayerParam::from_path("bn1.running_mean"), None);
        assert_eq!(
            LayerParam::from_path("head.subnet_conv.weight"),
            Some(LayerParam::ConvWeight)
        );
        assert_eq!(LayerParam::from_path("subnet.weight"), None);
        assert_eq!(
            LayerParam::from_path("conv3_bn.bias"),
            Some(LayerParam::NormBias)
        );
        assert_eq!(
            LayerParam::from_path("BatchNorm2.weight"),
            Some(LayerParam::NormWeight)
        );
        assert_eq!(LayerParam::from_path("abnormal_conv.weight"), Some(LayerParam::ConvWeight));
        assert_eq!(LayerParam::from_path("fc.weight"), None);
        assert_eq!(LayerParam::from_path("weight"), None);
    }

    #[test]
    fn normal_init() -> Result<()> {
        tch::manual_seed(1);
        let vs = nn::VarStore::new(Device::Cpu);
        build_net(&vs);

        let fc_before = variable(&vs, "fc.weight").copy();
        tch::no_grad(|| {
            let _ = variable(&vs, "bn1.bias").fill_(1.0);
        });

        weights_init(&vs, InitKind::Normal, 0.02)?;

        let conv = variable(&vs, "block.conv2.weight");
        let std = f64::from(conv.std(true));
        assert!(std > 0.015 && std < 0.025, "unexpected std {}", std);

        // `bn` inside `subnet` does not make a norm layer
        let subnet_conv = variable(&vs, "head.subnet_conv.weight");
        assert_abs_diff_eq!(f64::from(subnet_conv.mean(Kind::Float)), 0.0, epsilon = 0.05);

        assert_eq!(f64::from(variable(&vs, "bn1.bias").abs().sum(Kind::Float)), 0.0);
        let bn_weight = variable(&vs, "bn1.weight");
        assert_abs_diff_eq!(f64::from(bn_weight.mean(Kind::Float)), 1.0, epsilon = 0.05);

        let fc_after = variable(&vs, "fc.weight");
        assert!(fc_before.equal(&fc_after));
        Ok(())
    }

    #[test]
    fn kaiming_and_xavier_std() -> Result<()> {
        tch::manual_seed(2);
        let vs = nn::VarStore::new(Device::Cpu);
        build_net(&vs);

        // conv2 has fan_in 72 and fan_out 144
        weights_init(&vs, InitKind::Kaiming, 1.0)?;
        let std = f64::from(variable(&vs, "block.conv2.weight").std(true));
        assert_abs_diff_eq!(std, (2.0f64 / 72.0).sqrt(), epsilon = 0.02);

        weights_init(&vs, InitKind::Xavier, 1.0)?;
        let std = f64::from(variable(&vs, "block.conv2.weight").std(true));
        assert_abs_diff_eq!(std, (2.0f64 / 216.0).sqrt(), epsilon = 0.01);
        Ok(())
    }

    #[test]
    fn orthogonal_init() -> Result<()> {
        tch::manual_seed(3);
        let vs = nn::VarStore::new(Device::Cpu);
        build_net(&vs);

        weights_init(&vs, InitKind::Orthogonal, 0.5)?;

        // 16 rows of length 72 are orthogonal with norm 0.5
        let weight = variable(&vs, "block.conv2.weight").view([16, -1]);
        let gram = weight.matmul(&weight.tr());
        let expect = Tensor::eye(16, (Kind::Float, Device::Cpu)) * 0.25;
        let diff = f64::from((gram - expect).abs().max());
        assert!(diff < 1e-4, "max deviation {}", diff);
        Ok(())
    }

    #[test]
    fn unknown_method() {
        let err = InitKind::from_name("uniform").unwrap_err();
        assert_eq!(
            err.to_string(),
            "initialization method [uniform] is not implemented"
        );
        assert_eq!(InitKind::from_name("xavier").unwrap(), InitKind::Xavier);
        assert_eq!(InitKind::Orthogonal.to_string(), "orthogonal");
    }
}
