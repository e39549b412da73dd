use convnet_core::{Shape, Tensor};
use rand::rngs::StdRng;

use super::layers::{split_batch, Layer, ParamCount};
use crate::backend::ImageDataFormat;
use crate::error::{NnError, NnResult};
use crate::regularizers::Regularizer;
use crate::spec::{LayerSpec, Padding};

/// `(channels, height, width)` of a per-sample image shape.
fn image_dims(input: &Shape, format: ImageDataFormat) -> NnResult<(usize, usize, usize)> {
    match (input.dims(), format) {
        (&[c, h, w], ImageDataFormat::ChannelsFirst) => Ok((c, h, w)),
        (&[h, w, c], ImageDataFormat::ChannelsLast) => Ok((c, h, w)),
        _ => Err(NnError::RankMismatch { expected: 3, got: input.clone() }),
    }
}

fn image_shape(format: ImageDataFormat, c: usize, h: usize, w: usize) -> Shape {
    match format {
        ImageDataFormat::ChannelsFirst => Shape::new(vec![c, h, w]),
        ImageDataFormat::ChannelsLast => Shape::new(vec![h, w, c]),
    }
}

/// Batched input as NCHW, the layout the kernels below iterate in.
fn to_nchw(input: &Tensor<f64>, format: ImageDataFormat) -> NnResult<Tensor<f64>> {
    let (_, sample) = split_batch(input)?;
    image_dims(&sample, format)?;
    Ok(match format {
        ImageDataFormat::ChannelsFirst => input.clone(),
        ImageDataFormat::ChannelsLast => input.permute(&[0, 3, 1, 2])?,
    })
}

fn from_nchw(output: Tensor<f64>, format: ImageDataFormat) -> NnResult<Tensor<f64>> {
    Ok(match format {
        ImageDataFormat::ChannelsFirst => output,
        ImageDataFormat::ChannelsLast => output.permute(&[0, 2, 3, 1])?,
    })
}

/// 2D Convolution layer.
///
/// Per-sample input is `(H, W, C)` or `(C, H, W)` depending on `data_format`;
/// the output keeps the same layout with `filters` channels.
#[derive(Debug, Clone)]
pub struct Conv2D {
    pub filters: usize,
    pub kernel_size: (usize, usize),
    pub strides: (usize, usize),
    pub padding: Padding,
    pub data_format: ImageDataFormat,
    pub kernel_regularizer: Option<Regularizer>,
    /// Declared when this is the first layer of a model.
    pub input_shape: Option<Shape>,
    kernel: Option<Tensor<f64>>, // [filters, in_channels, kH, kW]
    bias: Option<Tensor<f64>>,   // [filters]
}

impl Conv2D {
    pub fn new(filters: usize, kernel_size: (usize, usize)) -> Self {
        Conv2D {
            filters,
            kernel_size,
            strides: (1, 1),
            padding: Padding::Valid,
            data_format: ImageDataFormat::default(),
            kernel_regularizer: None,
            input_shape: None,
            kernel: None,
            bias: None,
        }
    }

    pub fn with_strides(mut self, strides: (usize, usize)) -> Self {
        self.strides = strides;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_data_format(mut self, data_format: ImageDataFormat) -> Self {
        self.data_format = data_format;
        self
    }

    pub fn with_kernel_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.kernel_regularizer = Some(regularizer);
        self
    }

    pub fn with_input_shape(mut self, shape: impl Into<Shape>) -> Self {
        self.input_shape = Some(shape.into());
        self
    }

    pub fn kernel(&self) -> Option<&Tensor<f64>> {
        self.kernel.as_ref()
    }
}

impl Layer for Conv2D {
    fn spec(&self) -> LayerSpec {
        LayerSpec::Conv2D {
            filters: self.filters,
            kernel_size: self.kernel_size,
            strides: self.strides,
            padding: self.padding,
            data_format: self.data_format,
            kernel_regularizer: self.kernel_regularizer,
            input_shape: self.input_shape.clone(),
        }
    }

    fn output_shape(&self, input: &Shape) -> NnResult<Shape> {
        let (_, h, w) = image_dims(input, self.data_format)?;
        let out_h = self.padding.output_length(h, self.kernel_size.0, self.strides.0)?;
        let out_w = self.padding.output_length(w, self.kernel_size.1, self.strides.1)?;
        Ok(image_shape(self.data_format, self.filters, out_h, out_w))
    }

    /// Glorot-uniform kernel, zero bias.
    fn build(&mut self, input: &Shape, rng: &mut StdRng) -> NnResult<()> {
        let (in_channels, _, _) = image_dims(input, self.data_format)?;
        let (kh, kw) = self.kernel_size;
        let fan_in = in_channels * kh * kw;
        let fan_out = self.filters * kh * kw;
        let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
        self.kernel = Some(Tensor::random_uniform(
            vec![self.filters, in_channels, kh, kw],
            -limit,
            limit,
            rng,
        ));
        self.bias = Some(Tensor::zeros(vec![self.filters]));
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.kernel.is_some()
    }

    fn forward(&mut self, input: &Tensor<f64>, _training: bool) -> NnResult<Tensor<f64>> {
        let (kernel, bias) = match (&self.kernel, &self.bias) {
            (Some(k), Some(b)) => (k, b),
            _ => return Err(NnError::NotBuilt),
        };
        let x = to_nchw(input, self.data_format)?;
        let dims = x.shape().dims();
        let (batch, in_ch, h, w) = (dims[0], dims[1], dims[2], dims[3]);
        if in_ch != kernel.shape().dims()[1] {
            return Err(NnError::ShapeMismatch {
                expected: image_shape(self.data_format, kernel.shape().dims()[1], h, w),
                got: input.shape().without_batch(),
            });
        }

        let (kh, kw) = self.kernel_size;
        let (sh, sw) = self.strides;
        let out_h = self.padding.output_length(h, kh, sh)?;
        let out_w = self.padding.output_length(w, kw, sw)?;
        let pad_h = self.padding.leading(h, kh, sh, out_h) as isize;
        let pad_w = self.padding.leading(w, kw, sw, out_w) as isize;

        let xd = x.data();
        let kd = kernel.data();
        let mut output = vec![0.0f64; batch * self.filters * out_h * out_w];

        for b in 0..batch {
            for f in 0..self.filters {
                for oh in 0..out_h {
                    for ow in 0..out_w {
                        let mut sum = bias.data()[f];
                        for c in 0..in_ch {
                            for i in 0..kh {
                                let ih = (oh * sh + i) as isize - pad_h;
                                if ih < 0 || ih >= h as isize {
                                    continue;
                                }
                                for j in 0..kw {
                                    let iw = (ow * sw + j) as isize - pad_w;
                                    if iw < 0 || iw >= w as isize {
                                        continue;
                                    }
                                    let x_val = xd[((b * in_ch + c) * h + ih as usize) * w + iw as usize];
                                    let w_val = kd[((f * in_ch + c) * kh + i) * kw + j];
                                    sum += w_val * x_val;
                                }
                            }
                        }
                        output[((b * self.filters + f) * out_h + oh) * out_w + ow] = sum;
                    }
                }
            }
        }

        let y = Tensor::new(output, vec![batch, self.filters, out_h, out_w])?;
        from_nchw(y, self.data_format)
    }

    fn parameter_count(&self, input: &Shape) -> NnResult<ParamCount> {
        let (in_channels, _, _) = image_dims(input, self.data_format)?;
        let (kh, kw) = self.kernel_size;
        Ok(ParamCount::trainable(kh * kw * in_channels * self.filters + self.filters))
    }

    fn parameters(&self) -> Vec<&Tensor<f64>> {
        self.kernel.iter().chain(self.bias.iter()).collect()
    }

    fn regularization_penalty(&self) -> f64 {
        match (&self.kernel_regularizer, &self.kernel) {
            (Some(reg), Some(k)) => reg.penalty(k),
            _ => 0.0,
        }
    }

    fn declared_input_shape(&self) -> Option<&Shape> {
        self.input_shape.as_ref()
    }
}

/// Max Pooling 2D. Strides default to the pool size.
#[derive(Debug, Clone, Copy)]
pub struct MaxPool2D {
    pub pool_size: (usize, usize),
    pub strides: (usize, usize),
    pub padding: Padding,
    pub data_format: ImageDataFormat,
}

impl MaxPool2D {
    pub fn new(pool_size: (usize, usize)) -> Self {
        MaxPool2D {
            pool_size,
            strides: pool_size,
            padding: Padding::Valid,
            data_format: ImageDataFormat::default(),
        }
    }

    pub fn with_strides(mut self, strides: (usize, usize)) -> Self {
        self.strides = strides;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_data_format(mut self, data_format: ImageDataFormat) -> Self {
        self.data_format = data_format;
        self
    }
}

impl Layer for MaxPool2D {
    fn spec(&self) -> LayerSpec {
        LayerSpec::MaxPool2D {
            pool_size: self.pool_size,
            strides: self.strides,
            padding: self.padding,
            data_format: self.data_format,
        }
    }

    fn output_shape(&self, input: &Shape) -> NnResult<Shape> {
        let (c, h, w) = image_dims(input, self.data_format)?;
        let out_h = self.padding.output_length(h, self.pool_size.0, self.strides.0)?;
        let out_w = self.padding.output_length(w, self.pool_size.1, self.strides.1)?;
        Ok(image_shape(self.data_format, c, out_h, out_w))
    }

    fn forward(&mut self, input: &Tensor<f64>, _training: bool) -> NnResult<Tensor<f64>> {
        let x = to_nchw(input, self.data_format)?;
        let dims = x.shape().dims();
        let (batch, channels, h, w) = (dims[0], dims[1], dims[2], dims[3]);
        let (ph, pw) = self.pool_size;
        let (sh, sw) = self.strides;
        let out_h = self.padding.output_length(h, ph, sh)?;
        let out_w = self.padding.output_length(w, pw, sw)?;
        let pad_h = self.padding.leading(h, ph, sh, out_h);
        let pad_w = self.padding.leading(w, pw, sw, out_w);

        let xd = x.data();
        let mut output = Vec::with_capacity(batch * channels * out_h * out_w);
        for plane in xd.chunks(h * w) {
            for oh in 0..out_h {
                // Window rows clipped to the input; padding never wins the max.
                let top = (oh * sh).saturating_sub(pad_h);
                let bottom = (oh * sh + ph).saturating_sub(pad_h).min(h);
                for ow in 0..out_w {
                    let left = (ow * sw).saturating_sub(pad_w);
                    let right = (ow * sw + pw).saturating_sub(pad_w).min(w);
                    let mut max_val = f64::NEG_INFINITY;
                    for row in plane[top * w..bottom * w].chunks(w) {
                        for &v in &row[left..right] {
                            if v > max_val {
                                max_val = v;
                            }
                        }
                    }
                    output.push(max_val);
                }
            }
        }

        let y = Tensor::new(output, vec![batch, channels, out_h, out_w])?;
        from_nchw(y, self.data_format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regularizers::l2;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_conv2d_output_shapes() {
        let conv = Conv2D::new(96, (11, 11)).with_strides((4, 4)).with_padding(Padding::Same);
        let out = conv.output_shape(&Shape::new(vec![227, 227, 3])).unwrap();
        assert_eq!(out.dims(), &[57, 57, 96]);

        let conv = conv.with_data_format(ImageDataFormat::ChannelsFirst);
        let out = conv.output_shape(&Shape::new(vec![3, 227, 227])).unwrap();
        assert_eq!(out.dims(), &[96, 57, 57]);

        let valid = Conv2D::new(8, (5, 5));
        assert!(matches!(
            valid.output_shape(&Shape::new(vec![4, 4, 1])),
            Err(NnError::NegativeDimension { .. })
        ));
        assert!(matches!(
            valid.output_shape(&Shape::new(vec![4, 4])),
            Err(NnError::RankMismatch { expected: 3, .. })
        ));
    }

    #[test]
    fn test_conv2d_param_count() {
        let conv = Conv2D::new(96, (11, 11));
        let params = conv.parameter_count(&Shape::new(vec![227, 227, 3])).unwrap();
        assert_eq!(params.trainable, 11 * 11 * 3 * 96 + 96);
        assert_eq!(params.non_trainable, 0);
    }

    #[test]
    fn test_conv2d_forward_valid() {
        // [batch=1, H=4, W=4, C=1]
        let data: Vec<f64> = (0..16).map(|i| i as f64).collect();
        let input = Tensor::new(data, vec![1, 4, 4, 1]).unwrap();
        let mut conv = Conv2D::new(2, (3, 3));
        conv.build(&Shape::new(vec![4, 4, 1]), &mut rng()).unwrap();
        let out = conv.forward(&input, false).unwrap();
        assert_eq!(out.shape_vec(), vec![1, 2, 2, 2]);
    }

    #[test]
    fn test_conv2d_same_padding_box_filter() {
        // all-ones 3x3 kernel over all-ones input counts in-bounds taps
        let input = Tensor::ones(vec![1, 1, 3, 3]);
        let mut conv = Conv2D::new(1, (3, 3))
            .with_padding(Padding::Same)
            .with_data_format(ImageDataFormat::ChannelsFirst);
        conv.build(&Shape::new(vec![1, 3, 3]), &mut rng()).unwrap();
        conv.kernel = Some(Tensor::ones(vec![1, 1, 3, 3]));
        let out = conv.forward(&input, false).unwrap();
        assert_eq!(out.shape_vec(), vec![1, 1, 3, 3]);
        assert_eq!(out.data(), &[4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
    }

    #[test]
    fn test_conv2d_layouts_agree() {
        let nchw: Vec<f64> = (0..2 * 5 * 5).map(|i| (i as f64 * 0.37).sin()).collect();
        let first_in = Tensor::new(nchw, vec![1, 2, 5, 5]).unwrap();
        let last_in = first_in.permute(&[0, 2, 3, 1]).unwrap();

        let mut first = Conv2D::new(3, (3, 3))
            .with_strides((2, 2))
            .with_padding(Padding::Same)
            .with_data_format(ImageDataFormat::ChannelsFirst);
        let mut last = first.clone().with_data_format(ImageDataFormat::ChannelsLast);
        first.build(&Shape::new(vec![2, 5, 5]), &mut rng()).unwrap();
        last.build(&Shape::new(vec![5, 5, 2]), &mut rng()).unwrap();

        let a = first.forward(&first_in, false).unwrap();
        let b = last.forward(&last_in, false).unwrap().permute(&[0, 3, 1, 2]).unwrap();
        assert_eq!(a.shape_vec(), vec![1, 3, 3, 3]);
        for (x, y) in a.data().iter().zip(b.data()) {
            approx::assert_relative_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_conv2d_regularization_penalty() {
        let mut conv = Conv2D::new(4, (3, 3)).with_kernel_regularizer(l2(0.0002));
        assert_eq!(conv.regularization_penalty(), 0.0);
        conv.build(&Shape::new(vec![8, 8, 2]), &mut rng()).unwrap();
        let expected = 0.0002 * conv.kernel().unwrap().sum_squares();
        approx::assert_relative_eq!(conv.regularization_penalty(), expected);
    }

    #[test]
    fn test_maxpool2d() {
        let data: Vec<f64> = (0..16).map(|i| i as f64).collect();
        let input = Tensor::new(data, vec![1, 1, 4, 4]).unwrap();
        let mut pool = MaxPool2D::new((2, 2)).with_data_format(ImageDataFormat::ChannelsFirst);
        let out = pool.forward(&input, false).unwrap();
        assert_eq!(out.shape_vec(), vec![1, 1, 2, 2]);
        // Max of [0,1,4,5]=5, [2,3,6,7]=7, [8,9,12,13]=13, [10,11,14,15]=15
        assert_eq!(out.data(), &[5.0, 7.0, 13.0, 15.0]);
    }

    #[test]
    fn test_maxpool2d_overlapping_windows() {
        let mut pool = MaxPool2D::new((3, 3)).with_strides((2, 2));
        assert_eq!(pool.output_shape(&Shape::new(vec![57, 57, 96])).unwrap().dims(), &[28, 28, 96]);
        assert_eq!(pool.output_shape(&Shape::new(vec![13, 13, 256])).unwrap().dims(), &[6, 6, 256]);
        assert!(pool.output_shape(&Shape::new(vec![2, 2, 256])).is_err());

        let data: Vec<f64> = (0..25).map(|i| i as f64).collect();
        let input = Tensor::new(data, vec![1, 5, 5, 1]).unwrap();
        let out = pool.forward(&input, false).unwrap();
        assert_eq!(out.shape_vec(), vec![1, 2, 2, 1]);
        assert_eq!(out.data(), &[12.0, 14.0, 22.0, 24.0]);
    }

    #[test]
    fn test_maxpool2d_same_padding() {
        let data: Vec<f64> = (0..9).map(|i| i as f64).collect();
        let input = Tensor::new(data, vec![1, 1, 3, 3]).unwrap();
        let mut pool = MaxPool2D::new((2, 2))
            .with_padding(Padding::Same)
            .with_data_format(ImageDataFormat::ChannelsFirst);
        let out = pool.forward(&input, false).unwrap();
        assert_eq!(out.shape_vec(), vec![1, 1, 2, 2]);
        assert_eq!(out.data(), &[4.0, 5.0, 7.0, 8.0]);
    }
}
