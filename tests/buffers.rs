use approx::assert_abs_diff_eq;

use rust_mlpp::{DenseBuffer, Error, Matrix, Tensor3, Vector};

fn counting(n: usize) -> Vec<f64> {
    (1..=n).map(|v| v as f64).collect()
}

#[test]
fn add_then_sub_restores_the_operand() {
    let a = Vector::from(counting(10));
    let b = Vector::filled(10, 0.25);

    let mut c = a.add_new(&b).unwrap();
    c.sub(&b).unwrap();
    assert_eq!(c, a);

    let mut out = Vector::default();
    a.add_into(&b, &mut out).unwrap();
    assert_eq!(out, a.add_new(&b).unwrap());
}

#[test]
fn flatten_is_inverse_of_from_flat() {
    let m = Matrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
    let flat = m.flatten();
    assert_eq!(flat.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(Matrix::from_flat(m.shape(), flat.into_vec()).unwrap(), m);

    let t = Tensor3::from_slices(&[m.clone(), m.scalar_multiply_new(-1.0)]).unwrap();
    let back = Tensor3::from_flat(t.shape(), t.flatten().into_vec()).unwrap();
    assert_eq!(back, t);
    assert_eq!(back[(1, 1, 2)], -6.0);
}

#[test]
fn inverse_times_matrix_is_identity() {
    let m = Matrix::from_rows(&[
        vec![4.0, 7.0, 2.0],
        vec![3.0, 6.0, 1.0],
        vec![2.0, 5.0, 3.0],
    ])
    .unwrap();
    let product = m.matmul(&m.inverse().unwrap()).unwrap();
    let identity = Matrix::identity(3);
    for (got, want) in product.as_slice().iter().zip(identity.as_slice()) {
        assert_abs_diff_eq!(*got, *want, epsilon = 1e-10);
    }
}

#[test]
fn singular_inverse_is_an_error() {
    let m = Matrix::from_rows(&[vec![1.0, 2.0], vec![2.0, 4.0]]).unwrap();
    assert!(matches!(m.inverse(), Err(Error::SingularMatrix)));
    assert_abs_diff_eq!(m.determinant().unwrap(), 0.0);
}

#[test]
fn gram_of_duplicate_rows() {
    let row = counting(10);
    let x = Matrix::from_rows(&[row.clone(), row]).unwrap();
    let xtx = x.transpose_matmul(&x).unwrap();

    assert_eq!(xtx.shape(), (10, 10));
    assert_eq!(xtx[(0, 0)], 2.0);
    assert_eq!(xtx[(9, 9)], 200.0);
    assert_eq!(xtx, x.transpose().matmul(&x).unwrap());
}

#[test]
fn hadamard_product_squares_elements() {
    let v = Vector::from(counting(10));
    let squared = v.hadamard_product_new(&v).unwrap();
    let expected: Vec<f64> = (1..=10).map(|i| (i * i) as f64).collect();
    assert_eq!(squared.as_slice(), expected.as_slice());
    assert_eq!(squared[9], 100.0);
}

#[test]
fn identity_has_unit_diagonal() {
    let i = Matrix::identity(10);
    for r in 0..10 {
        for c in 0..10 {
            assert_eq!(i[(r, c)], if r == c { 1.0 } else { 0.0 });
        }
    }
    assert_eq!(i.sum(), 10.0);
}

#[test]
fn mismatched_shapes_are_rejected() {
    let a = Matrix::new(2, 3);
    let b = Matrix::new(3, 2);
    assert!(matches!(a.add_new(&b), Err(Error::ShapeMismatch { .. })));
    assert!(a.matmul(&a).is_err());
    assert!(a.matmul(&b).is_ok());
}
