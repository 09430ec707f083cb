use ndarray::{Array, Array1, Array2, Array3, Array4, IxDyn};

type F = f32;
pub type ArrayF<D> = Array<F, D>;
pub type Array1F = Array1<F>;
pub type Array2F = Array2<F>;
pub type Array3F = Array3<F>;
pub type Array4F = Array4<F>;
pub type ArrayDynF = Array<F, IxDyn>;

pub type GenericResult<T> = anyhow::Result<T>;

pub const EPSILON: f32 = 0.0000001;

pub fn arrays_almost_equal<D: ndarray::Dimension>(arr1: &ArrayF<D>, arr2: &ArrayF<D>) -> bool {
    arr1.shape() == arr2.shape()
        && arr1
            .iter()
            .zip(arr2.iter())
            .all(|(a, b)| (a - b).abs() < 0.001)
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_arrays_almost_equal() {
        let a = array![[1.0, 2.0], [3.0, 4.0]];
        let b = array![[1.0004, 2.0], [3.0, 3.9996]];
        assert!(arrays_almost_equal(&a, &b));

        let c = array![[1.1, 2.0], [3.0, 4.0]];
        assert!(!arrays_almost_equal(&a, &c));
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.9999);
        assert!(sigmoid(-10.0) < 0.0001);
    }
}
