use burn::prelude::*;

/// Render projection intensities with the Beer-Lambert law.
///
/// `attenuation` and `distances` are `[rays, samples]`. Distances are in
/// normalized volume units and are converted to centimetres with
/// `slice_size_cm / 2`, since the model predicts attenuation per cm. With
/// `scaling = Some((s, k))` the transmittance `T` is mapped to
/// `ln(T + k) / s`, matching how stored projections are scaled.
pub fn beer_lambert<B: Backend>(
    attenuation: Tensor<B, 2>,
    distances: Tensor<B, 2>,
    scaling: Option<(f64, f64)>,
    slice_size_cm: f64,
) -> Tensor<B, 1> {
    let [num_rays, _] = attenuation.dims();

    let distances_cm = distances.mul_scalar(slice_size_cm / 2.0);
    let optical_depth = (attenuation * distances_cm)
        .sum_dim(1)
        .reshape([num_rays]);
    let transmittance = optical_depth.neg().exp();

    match scaling {
        Some((s, k)) => transmittance.add_scalar(k).log().div_scalar(s),
        None => transmittance,
    }
}
