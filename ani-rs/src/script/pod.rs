//! Plain-old-data values: numbers, ranges, vectors, matrices and strings.
//!
//! PODs are copied on assignment.  Sub-element writes (`v.x = 1`,
//! `m[0][1] = 2`) never mutate a POD in place through a shared reference;
//! the index handle in [`super::value`] reads the owner, patches a copy
//! with [`Pod::set_element`] and stores the copy back.

use std::fmt;

use super::types::PodType;

/// A row-major `rows × cols` block of scalars.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// All-zero matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![0.0; rows * cols] }
    }

    /// Ones on the main diagonal, zero elsewhere.  Non-square shapes get
    /// the leading diagonal only.
    pub fn identity(rows: usize, cols: usize) -> Self {
        let mut m = Self::new(rows, cols);
        for i in 0..rows.min(cols) {
            m.set(i, i, 1.0);
        }
        m
    }

    /// Build from rows of equal length.  Panics on ragged input.
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            assert_eq!(row.len(), cols, "ragged matrix rows");
            data.extend_from_slice(row);
        }
        Self { rows: rows.len(), cols, data }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.check(r, c);
        self.data[r * self.cols + c]
    }

    pub fn set(&mut self, r: usize, c: usize, x: f64) {
        self.check(r, c);
        self.data[r * self.cols + c] = x;
    }

    pub fn row(&self, r: usize) -> Vec<f64> {
        self.check(r, 0);
        self.data[r * self.cols..(r + 1) * self.cols].to_vec()
    }

    pub fn set_row(&mut self, r: usize, row: &[f64]) {
        self.check(r, 0);
        assert_eq!(row.len(), self.cols, "matrix row width mismatch");
        self.data[r * self.cols..(r + 1) * self.cols].copy_from_slice(row);
    }

    fn check(&self, r: usize, c: usize) {
        if r >= self.rows || (c >= self.cols && self.cols > 0) {
            panic!(
                "matrix index ({r},{c}) out of range for matrix<{},{}>",
                self.rows, self.cols
            );
        }
    }

    /// Element-wise combination of two equally shaped matrices.
    pub fn zip(&self, other: &Matrix, f: impl Fn(f64, f64) -> f64) -> Matrix {
        assert!(self.rows == other.rows && self.cols == other.cols, "matrix shape mismatch");
        let data = self.data.iter().zip(&other.data).map(|(a, b)| f(*a, *b)).collect();
        Matrix { rows: self.rows, cols: self.cols, data }
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Matrix {
        Matrix { rows: self.rows, cols: self.cols, data: self.data.iter().map(|x| f(*x)).collect() }
    }

    /// `self · other`.
    pub fn mul(&self, other: &Matrix) -> Matrix {
        assert_eq!(self.cols, other.rows, "matrix product shape mismatch");
        let mut out = Matrix::new(self.rows, other.cols);
        for r in 0..self.rows {
            for c in 0..other.cols {
                let mut acc = 0.0;
                for k in 0..self.cols {
                    acc += self.data[r * self.cols + k] * other.data[k * other.cols + c];
                }
                out.data[r * other.cols + c] = acc;
            }
        }
        out
    }

    /// `self · v`, treating `v` as a column vector.
    pub fn mul_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.cols, v.len(), "matrix-vector shape mismatch");
        (0..self.rows)
            .map(|r| self.data[r * self.cols..(r + 1) * self.cols].iter().zip(v).map(|(a, b)| a * b).sum())
            .collect()
    }
}

/// Index into a composite POD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodIndex {
    /// Vector component, range endpoint, matrix row or string character.
    Component(usize),
    /// Matrix cell `(row, col)`.
    Cell(usize, usize),
}

/// A POD runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Pod {
    Integer(i32),
    Scalar(f64),
    Range(f64, f64),
    Vector(Vec<f64>),
    Matrix(Matrix),
    String(String),
}

impl Pod {
    pub fn pod_type(&self) -> PodType {
        match self {
            Pod::Integer(_) => PodType::Integer,
            Pod::Scalar(_) => PodType::Scalar,
            Pod::Range(..) => PodType::Range,
            Pod::Vector(v) => PodType::Vector(Some(v.len())),
            Pod::Matrix(m) => PodType::Matrix(Some(m.rows), Some(m.cols)),
            Pod::String(_) => PodType::String,
        }
    }

    /// Zero or identity value of a complete POD type.
    pub fn prototype(ty: PodType) -> Pod {
        match ty {
            PodType::Integer => Pod::Integer(0),
            PodType::Scalar => Pod::Scalar(0.0),
            PodType::Range => Pod::Range(0.0, 0.0),
            PodType::Vector(Some(n)) => Pod::Vector(vec![0.0; n]),
            PodType::Matrix(Some(r), Some(c)) => Pod::Matrix(Matrix::identity(r, c)),
            PodType::String => Pod::String(String::new()),
            incomplete => panic!("cannot prototype incomplete type {incomplete}"),
        }
    }

    /// Inverted truthiness: zero numbers are null, everything else is not.
    pub fn is_null(&self) -> bool {
        match self {
            Pod::Integer(n) => *n == 0,
            Pod::Scalar(x) => *x == 0.0,
            _ => false,
        }
    }

    /// Number of addressable components for a single-level index.
    pub fn component_count(&self) -> usize {
        match self {
            Pod::Vector(v) => v.len(),
            Pod::Range(..) => 2,
            Pod::Matrix(m) => m.rows,
            Pod::String(s) => s.chars().count(),
            other => panic!("{} is not indexable", other.pod_type()),
        }
    }

    /// Read one element.  Out-of-range indices panic.
    pub fn element(&self, idx: PodIndex) -> Pod {
        match (self, idx) {
            (Pod::Vector(v), PodIndex::Component(i)) => match v.get(i) {
                Some(x) => Pod::Scalar(*x),
                None => oob(self, i),
            },
            (Pod::Range(a, b), PodIndex::Component(i)) => match i {
                0 => Pod::Scalar(*a),
                1 => Pod::Scalar(*b),
                _ => oob(self, i),
            },
            (Pod::Matrix(m), PodIndex::Component(r)) => {
                if r >= m.rows {
                    oob(self, r);
                }
                Pod::Vector(m.row(r))
            }
            (Pod::Matrix(m), PodIndex::Cell(r, c)) => Pod::Scalar(m.get(r, c)),
            (Pod::String(s), PodIndex::Component(i)) => match s.chars().nth(i) {
                Some(ch) => Pod::String(ch.to_string()),
                None => oob(self, i),
            },
            (pod, idx) => panic!("cannot index {} with {idx:?}", pod.pod_type()),
        }
    }

    /// Overwrite one element.  The element kind must match what
    /// [`Pod::element`] would return.
    pub fn set_element(&mut self, idx: PodIndex, value: Pod) {
        let ty = self.pod_type();
        match (&mut *self, idx, value) {
            (Pod::Vector(v), PodIndex::Component(i), Pod::Scalar(x)) => match v.get_mut(i) {
                Some(slot) => *slot = x,
                None => oob_type(ty, i),
            },
            (Pod::Range(a, _), PodIndex::Component(0), Pod::Scalar(x)) => *a = x,
            (Pod::Range(_, b), PodIndex::Component(1), Pod::Scalar(x)) => *b = x,
            (Pod::Matrix(m), PodIndex::Component(r), Pod::Vector(row)) => {
                if r >= m.rows {
                    oob_type(ty, r);
                }
                m.set_row(r, &row);
            }
            (Pod::Matrix(m), PodIndex::Cell(r, c), Pod::Scalar(x)) => m.set(r, c, x),
            (Pod::String(s), PodIndex::Component(i), Pod::String(ch)) => {
                let mut chars: Vec<char> = s.chars().collect();
                if i >= chars.len() {
                    oob_type(ty, i);
                }
                let mut it = ch.chars();
                match (it.next(), it.next()) {
                    (Some(c), None) => chars[i] = c,
                    _ => panic!(
                        "string element {i} needs exactly one character, found {}",
                        ch.chars().count()
                    ),
                }
                *s = chars.into_iter().collect();
            }
            (_, idx, value) => panic!(
                "cannot store {} into element {idx:?} of {ty}",
                value.pod_type()
            ),
        }
    }
}

fn oob(pod: &Pod, i: usize) -> ! {
    oob_type(pod.pod_type(), i)
}

fn oob_type(ty: PodType, i: usize) -> ! {
    panic!("index {i} out of range for {ty}")
}

/// Scalars print with a trailing `.0` when integral so they stay distinct
/// from integers in output.
pub(crate) fn fmt_scalar(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}

fn fmt_tuple(xs: &[f64]) -> String {
    xs.iter().map(|x| fmt_scalar(*x)).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for Pod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pod::Integer(n) => write!(f, "{n}"),
            Pod::Scalar(x) => write!(f, "{}", fmt_scalar(*x)),
            Pod::Range(a, b) => write!(f, "({} .. {})", fmt_scalar(*a), fmt_scalar(*b)),
            Pod::Vector(v) => write!(f, "<{}>", fmt_tuple(v)),
            Pod::Matrix(m) => {
                write!(f, "[")?;
                for r in 0..m.rows {
                    if r > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "<{}>", fmt_tuple(&m.row(r)))?;
                }
                write!(f, "]")
            }
            Pod::String(s) => write!(f, "{s}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prototypes() {
        assert_eq!(Pod::prototype(PodType::Integer), Pod::Integer(0));
        assert_eq!(Pod::prototype(PodType::Vector(Some(3))), Pod::Vector(vec![0.0; 3]));
        assert_eq!(
            Pod::prototype(PodType::Matrix(Some(2), Some(2))),
            Pod::Matrix(Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]]))
        );
        assert_eq!(Pod::prototype(PodType::String), Pod::String(String::new()));
    }

    #[test]
    #[should_panic(expected = "cannot prototype incomplete type")]
    fn prototype_incomplete_panics() {
        Pod::prototype(PodType::Vector(None));
    }

    #[test]
    fn matrix_products() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]);
        let b = Matrix::from_rows(&[vec![0.0, 1.0], vec![1.0, 0.0]]);
        assert_eq!(a.mul(&b), Matrix::from_rows(&[vec![2.0, 1.0], vec![4.0, 3.0]]));
        assert_eq!(a.mul_vec(&[1.0, 1.0]), vec![3.0, 7.0]);
        let wide = Matrix::from_rows(&[vec![1.0, 0.0, 2.0]]);
        assert_eq!(wide.mul_vec(&[1.0, 1.0, 1.0]), vec![3.0]);
    }

    #[test]
    fn element_access() {
        let m = Pod::Matrix(Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]));
        assert_eq!(m.element(PodIndex::Component(1)), Pod::Vector(vec![3.0, 4.0]));
        assert_eq!(m.element(PodIndex::Cell(0, 1)), Pod::Scalar(2.0));
        let s = Pod::String("héllo".into());
        assert_eq!(s.element(PodIndex::Component(1)), Pod::String("é".into()));
        assert_eq!(Pod::Range(1.0, 2.0).element(PodIndex::Component(1)), Pod::Scalar(2.0));
    }

    #[test]
    fn set_element_copies_in() {
        let mut v = Pod::Vector(vec![1.0, 2.0, 3.0]);
        v.set_element(PodIndex::Component(2), Pod::Scalar(9.0));
        assert_eq!(v, Pod::Vector(vec![1.0, 2.0, 9.0]));

        let mut s = Pod::String("cat".into());
        s.set_element(PodIndex::Component(0), Pod::String("b".into()));
        assert_eq!(s, Pod::String("bat".into()));

        let mut m = Pod::prototype(PodType::Matrix(Some(2), Some(2)));
        m.set_element(PodIndex::Component(0), Pod::Vector(vec![5.0, 6.0]));
        assert_eq!(m.element(PodIndex::Cell(0, 1)), Pod::Scalar(6.0));
    }

    #[test]
    #[should_panic(expected = "string element 0 needs exactly one character, found 3")]
    fn string_element_keeps_length() {
        let mut s = Pod::String("abc".into());
        s.set_element(PodIndex::Component(0), Pod::String("xyz".into()));
    }

    #[test]
    #[should_panic(expected = "string element 1 needs exactly one character, found 0")]
    fn string_element_cannot_be_emptied() {
        let mut s = Pod::String("abc".into());
        s.set_element(PodIndex::Component(1), Pod::String(String::new()));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn matrix_row_out_of_range() {
        Pod::prototype(PodType::Matrix(Some(2), Some(2))).element(PodIndex::Component(2));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn range_endpoint_out_of_range() {
        Pod::Range(0.0, 1.0).element(PodIndex::Component(2));
    }

    #[test]
    fn display() {
        assert_eq!(Pod::Scalar(2.0).to_string(), "2.0");
        assert_eq!(Pod::Scalar(2.5).to_string(), "2.5");
        assert_eq!(Pod::Vector(vec![1.0, 0.0]).to_string(), "<1.0, 0.0>");
        assert_eq!(Pod::prototype(PodType::Matrix(Some(2), Some(2))).to_string(), "[<1.0, 0.0>, <0.0, 1.0>]");
    }
}
