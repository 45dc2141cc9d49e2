use super::HostCall;
use crate::error::{Error, Result};
use crate::layers::Activation;

fn map(call: &mut HostCall, f: fn(Activation, f32) -> f32) -> Result<()> {
    let n = call.uint(2)?;
    let code = call.uint(3)? as u32;
    let activation = Activation::from_code(code)
        .ok_or_else(|| Error::Device(format!("unknown activation code {}", code)))?;
    let mut out = call.take(1, n)?;
    let input = call.buf(0, n)?;
    for i in 0..n {
        out[i] = f(activation, input[i]);
    }
    call.put(1, out);
    Ok(())
}

pub fn activate(call: &mut HostCall) -> Result<()> {
    map(call, Activation::apply)
}

pub fn activate_derivative(call: &mut HostCall) -> Result<()> {
    map(call, Activation::derivative)
}
