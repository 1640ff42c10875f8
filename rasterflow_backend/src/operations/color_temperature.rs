use crate::buffer::PixelBuffer;
use crate::format;
use crate::graph::context::OpCtx;
use crate::operation::{Operation, OperationFactory, OperationVariant};
use crate::property::{PropertyError, PropertyInfo, Value, ValueType};
use miette::bail;
use parking_lot::Mutex;
use ustr::Ustr;

const LOWEST_TEMPERATURE: f64 = 1000.0;
const HIGHEST_TEMPERATURE: f64 = 12000.0;

const PROPERTIES: &[PropertyInfo] = &[
    PropertyInfo {
        name: "original-temperature",
        ty: ValueType::Float,
        description: "Estimated temperature of the light source in Kelvin the image was taken with.",
    },
    PropertyInfo {
        name: "intended-temperature",
        ty: ValueType::Float,
        description: "Corrected estimation of the temperature of the light source in Kelvin.",
    },
];

/// White-balance shift between two black-body temperatures.
///
/// The per-channel gains are preprocessed once and rebuilt lazily after a
/// temperature property changes.
#[derive(derive_more::Debug)]
pub struct ColorTemperature {
    original_temperature: f64,
    intended_temperature: f64,
    #[debug("(...)")]
    coefficients: Mutex<Option<[f64; 3]>>,
}

impl Default for ColorTemperature {
    fn default() -> Self {
        Self {
            original_temperature: 6500.0,
            intended_temperature: 6500.0,
            coefficients: Mutex::new(None),
        }
    }
}

impl Clone for ColorTemperature {
    fn clone(&self) -> Self {
        Self {
            original_temperature: self.original_temperature,
            intended_temperature: self.intended_temperature,
            coefficients: Mutex::new(None),
        }
    }
}

impl Operation for ColorTemperature {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:color-temperature")
    }

    fn variant(&self) -> OperationVariant {
        OperationVariant::Filter
    }

    fn properties(&self) -> &'static [PropertyInfo] {
        PROPERTIES
    }

    fn set_property(&mut self, name: Ustr, value: Value) -> Result<(), PropertyError> {
        match name.as_str() {
            "original-temperature" => self.original_temperature = value.expect_float(name)?,
            "intended-temperature" => self.intended_temperature = value.expect_float(name)?,
            _ => return Err(PropertyError::Unknown { name }),
        }
        // a temperature changed, the preprocessed gains are stale
        *self.coefficients.lock() = None;
        Ok(())
    }

    fn get_property(&self, name: Ustr) -> Option<Value> {
        match name.as_str() {
            "original-temperature" => Some(Value::Float(self.original_temperature)),
            "intended-temperature" => Some(Value::Float(self.intended_temperature)),
            _ => None,
        }
    }

    fn prepare(&self, ctx: OpCtx<'_>) -> miette::Result<()> {
        ctx.set_pad_format("input", format::RGBA_FLOAT);
        ctx.set_pad_format("output", format::RGBA_FLOAT);
        Ok(())
    }

    fn process(&self, ctx: OpCtx<'_>) -> miette::Result<()> {
        let result = ctx.result_rect();
        let Some(input) = ctx.input_buffer("input") else {
            bail!("input pad of `{}` is not connected", ctx.debug_name());
        };

        let coefficients = *self.coefficients.lock().get_or_insert_with(|| {
            preprocess(self.original_temperature, self.intended_temperature)
        });

        let mut pixels = input.pixels_rgba(result);
        for px in &mut pixels {
            px[0] *= coefficients[0] as f32;
            px[1] *= coefficients[1] as f32;
            px[2] *= coefficients[2] as f32;
        }

        let out = PixelBuffer::new(format::RGBA_FLOAT, result);
        out.write_rgba(result, &pixels);
        ctx.set_output(out);
        Ok(())
    }
}

fn preprocess(original: f64, intended: f64) -> [f64; 3] {
    let original_rgb = convert_k_to_rgb(original);
    let intended_rgb = convert_k_to_rgb(intended);
    [
        original_rgb[0] / intended_rgb[0],
        original_rgb[1] / intended_rgb[1],
        original_rgb[2] / intended_rgb[2],
    ]
}

/// Approximation of the Planckian locus in linear RGB by rational functions
/// of degree 5, evaluated with Horner's scheme.
fn convert_k_to_rgb(temperature: f64) -> [f64; 3] {
    let temperature = temperature.clamp(LOWEST_TEMPERATURE, HIGHEST_TEMPERATURE);
    let mut rgb = [0.0; 3];
    for (channel, r) in RGB_R55.iter().enumerate() {
        let mut nomin = r[0];
        for deg in 1..6 {
            nomin = nomin * temperature + r[deg];
        }
        let mut denom = r[6];
        for deg in 1..6 {
            denom = denom * temperature + r[6 + deg];
        }
        rgb[channel] = nomin / denom;
    }
    rgb
}

#[rustfmt::skip]
static RGB_R55: [[f64; 12]; 3] = [
    [
         6.9389923563552169e-01,  2.7719388100974670e+03,
         2.0999316761104289e+07, -4.8889434162208414e+09,
        -1.1899785506796783e+07, -4.7418427686099203e+04,
         1.0000000000000000e+00,  3.5434394338546258e+03,
        -5.6159353379127791e+05,  2.7369467137870544e+08,
         1.6295814912940913e+08,  4.3975072422421846e+05,
    ],
    [
         9.5417426141210926e-01,  2.2041043287098860e+03,
        -3.0142332673634286e+06, -3.5111986367681120e+03,
        -5.7030969525354260e+00,  6.1810926909962016e-01,
         1.0000000000000000e+00,  1.3728609973644000e+03,
         1.3099184987576159e+06, -2.1757404458816318e+03,
        -2.3892456292510311e+00,  8.1079012401293249e-01,
    ],
    [
        -7.1151622540856201e+10,  3.3728185802339764e+16,
        -7.9396187338868539e+19,  2.9699115135330123e+22,
        -9.7520399221734228e+22, -2.9250107732225114e+20,
         1.0000000000000000e+00,  1.3888666482167408e+16,
         2.3899765140914549e+19,  1.4583606312383295e+23,
         1.9766018324502894e+22,  2.9395068478016189e+18,
    ],
];

#[derive(Debug)]
pub struct ColorTemperatureFactory;

impl OperationFactory for ColorTemperatureFactory {
    fn id(&self) -> Ustr {
        Ustr::from("rasterflow:color-temperature")
    }

    fn variant(&self) -> OperationVariant {
        OperationVariant::Filter
    }

    fn categories(&self) -> &'static [&'static str] {
        &["color"]
    }

    fn description(&self) -> &'static str {
        "Changes the color temperature of the image."
    }

    fn flags(&self) -> crate::operation::OperationFlags {
        crate::operation::OperationFlags::OPENCL_SUPPORT
    }

    fn properties(&self) -> &'static [PropertyInfo] {
        PROPERTIES
    }

    fn create(&self) -> Box<dyn Operation> {
        Box::new(ColorTemperature::default())
    }
}
