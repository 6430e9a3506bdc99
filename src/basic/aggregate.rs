use nalgebra::DVector;
use num_complex::Complex64;

/// Contributions summed per key. `keys` is strictly ascending.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupedSum<K> {
    pub keys: Vec<K>,
    pub re: Vec<f64>,
    pub im: Vec<f64>,
}

/// Groups `(key, re, im)` triples by key and sums both parts independently.
///
/// Stable sort followed by a single reduce pass, so equal keys are summed in
/// input order. Empty input gives empty output.
pub fn sum_by_group<K, I>(items: I) -> GroupedSum<K>
where
    K: Ord + Copy,
    I: IntoIterator<Item = (K, f64, f64)>,
{
    let mut items: Vec<_> = items.into_iter().collect();
    items.sort_by_key(|&(k, _, _)| k);

    let mut out = GroupedSum {
        keys: Vec::new(),
        re: Vec::new(),
        im: Vec::new(),
    };
    for (k, re, im) in items {
        if out.keys.last() == Some(&k) {
            let last = out.keys.len() - 1;
            out.re[last] += re;
            out.im[last] += im;
        } else {
            out.keys.push(k);
            out.re.push(re);
            out.im.push(im);
        }
    }
    out
}

impl GroupedSum<usize> {
    /// Writes the sums into a dense complex vector of length `n`.
    pub fn scatter(&self, n: usize) -> DVector<Complex64> {
        let mut v = DVector::zeros(n);
        for ((&k, &re), &im) in self.keys.iter().zip(&self.re).zip(&self.im) {
            v[k] = Complex64::new(re, im);
        }
        v
    }
}
