use crate::{error::SvpgError, svpg::value_est::ValueEstimator};
use image::{Rgb, RgbImage};
use std::path::Path;
use tch::{Device, Tensor};

/// Where and how to project a critic's value function into a 2-D image.
pub struct PortraitSpec {
    /// Grid resolution per axis.
    pub definition: usize,
    /// Observation dimensions spanned by the image's x and y axes.
    pub dims: (usize, usize),
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
    /// Observation every grid point starts from; holds the remaining
    /// dimensions fixed.
    pub base_obs: Vec<f32>,
}

/// Sweep a `definition x definition` grid over two observation dimensions,
/// evaluate the critic at every point without gradients, and save the value
/// landscape as a PNG (low values dark, high values bright; the y axis
/// points up).
pub fn value_portrait<P: AsRef<Path>>(
    critic: &ValueEstimator,
    spec: &PortraitSpec,
    device: Device,
    path: P,
) -> Result<(), SvpgError> {
    let obs_size = spec.base_obs.len();
    if obs_size < 2 {
        return Err(SvpgError::PortraitDims(obs_size));
    }
    if spec.definition < 2 {
        return Err(SvpgError::InvalidConfig(
            "portrait definition must be at least 2".into(),
        ));
    }
    let (dim_x, dim_y) = spec.dims;
    if dim_x >= obs_size || dim_y >= obs_size || dim_x == dim_y {
        return Err(SvpgError::InvalidConfig(format!(
            "portrait dims ({dim_x}, {dim_y}) do not fit an observation of size {obs_size}"
        )));
    }

    let definition = spec.definition;
    let mut grid = Vec::with_capacity(definition * definition * obs_size);
    for iy in 0..definition {
        for ix in 0..definition {
            let mut obs = spec.base_obs.clone();
            obs[dim_x] = lerp(spec.x_range, ix as f64 / (definition - 1) as f64);
            obs[dim_y] = lerp(spec.y_range, iy as f64 / (definition - 1) as f64);
            grid.extend(obs);
        }
    }

    let values = tch::no_grad(|| {
        let obs = Tensor::from_slice(&grid)
            .view([(definition * definition) as i64, obs_size as i64])
            .to_device(device);
        critic.forward(&obs).to_device(Device::Cpu)
    });
    let values = Vec::<f32>::try_from(values).expect("critic output is a flat float vector");

    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let span = if max > min { max - min } else { 1.0 };

    let mut img = RgbImage::new(definition as u32, definition as u32);
    for iy in 0..definition {
        for ix in 0..definition {
            let value = values[iy * definition + ix];
            let t = ((value - min) / span) as f64;
            img.put_pixel(ix as u32, (definition - 1 - iy) as u32, heat(t));
        }
    }
    img.save(path)?;
    Ok(())
}

fn lerp((lo, hi): (f64, f64), t: f64) -> f32 {
    (lo + (hi - lo) * t) as f32
}

/// Three-stop color ramp, dark violet through red to pale yellow.
fn heat(t: f64) -> Rgb<u8> {
    const STOPS: [[f64; 3]; 3] = [
        [0.0, 0.0, 4.0],
        [187.0, 55.0, 84.0],
        [252.0, 255.0, 164.0],
    ];

    let t = t.clamp(0.0, 1.0) * 2.0;
    let (a, b, frac) = if t < 1.0 {
        (STOPS[0], STOPS[1], t)
    } else {
        (STOPS[1], STOPS[2], t - 1.0)
    };

    Rgb([
        (a[0] + (b[0] - a[0]) * frac) as u8,
        (a[1] + (b[1] - a[1]) * frac) as u8,
        (a[2] + (b[2] - a[2]) * frac) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svpg::Activation;
    use tch::nn;

    fn spec(obs_size: usize) -> PortraitSpec {
        PortraitSpec {
            definition: 16,
            dims: (0, 1),
            x_range: (-1.0, 1.0),
            y_range: (-1.0, 1.0),
            base_obs: vec![0.0; obs_size],
        }
    }

    #[test]
    fn portrait_is_written_to_disk() {
        let vs = nn::VarStore::new(Device::Cpu);
        let critic = ValueEstimator::new(&vs.root(), 4, &[8], Activation::Tanh);

        let path = std::env::temp_dir().join("svpg_value_portrait_test.png");
        let _ = std::fs::remove_file(&path);

        value_portrait(&critic, &spec(4), Device::Cpu, &path).unwrap();
        assert!(path.exists());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn tiny_observations_are_rejected() {
        let vs = nn::VarStore::new(Device::Cpu);
        let critic = ValueEstimator::new(&vs.root(), 1, &[4], Activation::Tanh);

        let path = std::env::temp_dir().join("svpg_never_written.png");
        let result = value_portrait(&critic, &spec(1), Device::Cpu, &path);
        assert!(matches!(result, Err(SvpgError::PortraitDims(1))));
    }

    #[test]
    fn duplicate_projection_dims_are_rejected() {
        let vs = nn::VarStore::new(Device::Cpu);
        let critic = ValueEstimator::new(&vs.root(), 4, &[8], Activation::Tanh);

        let mut bad = spec(4);
        bad.dims = (1, 1);
        let path = std::env::temp_dir().join("svpg_never_written.png");
        let result = value_portrait(&critic, &bad, Device::Cpu, &path);
        assert!(matches!(result, Err(SvpgError::InvalidConfig(_))));
    }

    #[test]
    fn heat_ramp_hits_its_endpoints() {
        assert_eq!(heat(0.0), Rgb([0, 0, 4]));
        assert_eq!(heat(1.0), Rgb([252, 255, 164]));
        assert_eq!(heat(2.0), heat(1.0));
    }
}
