/// Anchor products like `0.29 * 100.0` land a hair below the integer.
const SNAP_EPSILON: f64 = 1e-6;

/// Maps a normalized anchor to the top-left pixel of a `w`x`h` box on a
/// `canvas_w`x`canvas_h` canvas.
///
/// The anchor is the box center; the result is clamped so the box stays on
/// the canvas whenever it fits (`x` in `[0, max(0, W - w)]`, likewise `y`).
pub fn place(anchor: (f64, f64), size: (f64, f64), canvas: (u32, u32)) -> (u32, u32) {
    let (px, py) = anchor;
    let (w, h) = size;
    let (cw, ch) = (canvas.0 as f64, canvas.1 as f64);

    let x = px * cw - w / 2.0;
    let y = py * ch - h / 2.0;

    let x = x.clamp(0.0, (cw - w).max(0.0));
    let y = y.clamp(0.0, (ch - h).max(0.0));

    (floor_snapped(x) as u32, floor_snapped(y) as u32)
}

fn floor_snapped(v: f64) -> f64 {
    let nearest = v.round();
    if (v - nearest).abs() < SNAP_EPSILON {
        nearest
    } else {
        v.floor()
    }
}
