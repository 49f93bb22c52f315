use funty::Integral;

// Deltas wrap, so sorted signed values and unsorted row ranges both
// survive a round trip through an unsigned codec.

pub fn compute_deltas<T: Integral>(vals: &mut [T]) {
    for i in (1..vals.len()).rev() {
        vals[i] = vals[i].wrapping_sub(vals[i - 1]);
    }
}

pub fn compute_inverse_deltas<T: Integral>(vals: &mut [T]) {
    for i in 1..vals.len() {
        vals[i] = vals[i].wrapping_add(vals[i - 1]);
    }
}
