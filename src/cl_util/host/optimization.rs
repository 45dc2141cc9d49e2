use super::HostCall;
use crate::error::Result;

pub fn momentum_update(call: &mut HostCall) -> Result<()> {
    let (lr, momentum) = (call.float(3)?, call.float(4)?);
    let n = call.uint(5)?;

    let mut w = call.take(0, n)?;
    let mut v = call.take(2, n)?;
    let g = call.buf(1, n)?;
    for i in 0..n {
        v[i] = momentum * v[i] + lr * g[i];
        w[i] -= v[i];
    }
    call.put(0, w);
    call.put(2, v);
    Ok(())
}

fn sign_of(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

pub fn rprop_update(call: &mut HostCall) -> Result<()> {
    let (eta_plus, eta_minus) = (call.float(5)?, call.float(6)?);
    let (delta_max, delta_min) = (call.float(7)?, call.float(8)?);
    let n = call.uint(9)?;

    let mut w = call.take(0, n)?;
    let mut old_g = call.take(2, n)?;
    let mut delta = call.take(3, n)?;
    let mut last_change = call.take(4, n)?;
    let g = call.buf(1, n)?;

    for i in 0..n {
        let grad = g[i];
        let agreement = sign_of(grad * old_g[i]);
        if agreement > 0.0 {
            delta[i] = (delta[i] * eta_plus).min(delta_max);
            let change = -sign_of(grad) * delta[i];
            w[i] += change;
            last_change[i] = change;
            old_g[i] = grad;
        } else if agreement < 0.0 {
            delta[i] = (delta[i] * eta_minus).max(delta_min);
            w[i] -= last_change[i];
            last_change[i] = 0.0;
            old_g[i] = 0.0;
        } else {
            let change = -sign_of(grad) * delta[i];
            w[i] += change;
            last_change[i] = change;
            old_g[i] = grad;
        }
    }
    call.put(0, w);
    call.put(2, old_g);
    call.put(3, delta);
    call.put(4, last_change);
    Ok(())
}
