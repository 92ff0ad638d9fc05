use crate::{error::TensorError, shape::Shape};

pub trait Tensorizable {
    /// Trait to flatten arbitrary nested real data into row-major values and
    /// the shape they describe.
    ///
    /// # Errors
    /// Returns an error if the nesting is ragged.
    fn into_values(self) -> Result<(Vec<f32>, Shape), TensorError>;
}

impl Tensorizable for Vec<f32> {
    fn into_values(self) -> Result<(Vec<f32>, Shape), TensorError> {
        let shape = Shape::from(self.len());
        Ok((self, shape))
    }
}

impl Tensorizable for &[f32] {
    fn into_values(self) -> Result<(Vec<f32>, Shape), TensorError> {
        Ok((self.to_vec(), Shape::from(self.len())))
    }
}

impl Tensorizable for Vec<Vec<f32>> {
    fn into_values(self) -> Result<(Vec<f32>, Shape), TensorError> {
        let (dim0, dim1) = (self.len(), self.first().map_or(0, Vec::len));
        if let Some(row) = self.iter().find(|x| x.len() != dim1) {
            let expected = (self.len(), dim1).into();
            let received = (self.len(), row.len()).into();
            return Err(TensorError::InconsistentDimensions { expected, received });
        }

        let buf: Vec<f32> = self.into_iter().flatten().collect();
        Ok((buf, (dim0, dim1).into()))
    }
}

fn check_vec_3d(data: &[Vec<Vec<f32>>]) -> Result<Shape, TensorError> {
    if data.is_empty() {
        return Ok((0, 0, 0).into());
    }
    let planes = data.len();

    let expected_rows = data[0].len();
    let expected_columns = data[0].first().map_or(0, Vec::len);

    for plane in data {
        let actual_rows = plane.len();
        if actual_rows != expected_rows {
            return Err(TensorError::InconsistentDimensions {
                expected: (planes, expected_rows, expected_columns).into(),
                received: (planes, actual_rows, expected_columns).into(),
            });
        }

        for row in plane {
            let actual_columns = row.len();
            if actual_columns != expected_columns {
                return Err(TensorError::InconsistentDimensions {
                    expected: (planes, expected_rows, expected_columns).into(),
                    received: (planes, actual_rows, actual_columns).into(),
                });
            }
        }
    }

    Ok((planes, expected_rows, expected_columns).into())
}

impl Tensorizable for Vec<Vec<Vec<f32>>> {
    fn into_values(self) -> Result<(Vec<f32>, Shape), TensorError> {
        let shape = check_vec_3d(&self)?;
        let buf: Vec<f32> = self
            .into_iter()
            .flat_map(|v| v.into_iter().flatten())
            .collect();
        Ok((buf, shape))
    }
}

impl<const N: usize> Tensorizable for [f32; N] {
    fn into_values(self) -> Result<(Vec<f32>, Shape), TensorError> {
        Ok((self.to_vec(), Shape::from(N)))
    }
}

impl<const N0: usize, const N1: usize> Tensorizable for [[f32; N1]; N0] {
    fn into_values(self) -> Result<(Vec<f32>, Shape), TensorError> {
        let buf: Vec<f32> = self.into_iter().flatten().collect();
        Ok((buf, (N0, N1).into()))
    }
}

impl<const N0: usize, const N1: usize, const N2: usize> Tensorizable for [[[f32; N2]; N1]; N0] {
    fn into_values(self) -> Result<(Vec<f32>, Shape), TensorError> {
        let buf: Vec<f32> = self
            .into_iter()
            .flat_map(|v| v.into_iter().flatten())
            .collect();
        Ok((buf, (N0, N1, N2).into()))
    }
}
