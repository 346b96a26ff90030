//! N-dimensional dense integer buffers, used by the reference
//! interpreter for inputs, outputs and intermediate allocations.

use std::fmt;

use crate::error::{Error, Result};

/// A dense buffer over an axis-aligned box of coordinates. `mins` lets
/// a buffer start away from the origin, so an input that is read at
/// negative coordinates can be modelled directly.
#[derive(Clone, PartialEq, Eq)]
pub struct Buffer {
    name: String,
    mins: Vec<i64>,
    extents: Vec<i64>,
    data: Vec<i64>
}

impl Buffer {
    /// A zero-filled buffer covering `[0, extent)` along each axis.
    pub fn new(name: &str, extents: Vec<i64>) -> Buffer {
        Buffer::with_mins(name, vec![0; extents.len()], extents)
    }

    pub fn with_mins(name: &str, mins: Vec<i64>, extents: Vec<i64>) -> Buffer {
        assert_eq!(mins.len(), extents.len());
        let size = extents.iter().product::<i64>().max(0) as usize;
        Buffer {
            name: name.to_string(),
            mins,
            extents,
            data: vec![0; size]
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> usize {
        self.extents.len()
    }

    pub fn mins(&self) -> &[i64] {
        &self.mins
    }

    pub fn extents(&self) -> &[i64] {
        &self.extents
    }

    /// Row-major offset with the first axis contiguous.
    fn offset(&self, indices: &[i64]) -> Result<usize> {
        if indices.len() != self.extents.len() {
            return Err(self.out_of_bounds(indices));
        }
        let mut offset = 0usize;
        for i in (0..indices.len()).rev() {
            let rel = indices[i] - self.mins[i];
            if rel < 0 || rel >= self.extents[i] {
                return Err(self.out_of_bounds(indices));
            }
            offset = offset * self.extents[i] as usize + rel as usize;
        }
        Ok(offset)
    }

    fn out_of_bounds(&self, indices: &[i64]) -> Error {
        Error::OutOfBounds {
            buffer: self.name.clone(),
            indices: indices.to_vec()
        }
    }

    pub fn get(&self, indices: &[i64]) -> Result<i64> {
        Ok(self.data[self.offset(indices)?])
    }

    pub fn set(&mut self, indices: &[i64], value: i64) -> Result<()> {
        let offset = self.offset(indices)?;
        self.data[offset] = value;
        Ok(())
    }

    pub fn fill<F: Fn(&[i64]) -> i64>(&mut self, f: F) {
        for point in self.points() {
            let offset = self.offset(&point).unwrap();
            self.data[offset] = f(&point);
        }
    }

    /// Iterates every coordinate in the buffer, first axis fastest.
    pub fn points(&self) -> Points {
        Points::new(self.mins.clone(), self.extents.clone())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Buffer({}, mins: {:?}, extents: {:?})",
            self.name, self.mins, self.extents
        )
    }
}

/// Odometer-style iterator over the integer points of a box.
pub struct Points {
    mins: Vec<i64>,
    extents: Vec<i64>,
    current: Vec<i64>,
    done: bool
}

impl Points {
    pub(crate) fn new(mins: Vec<i64>, extents: Vec<i64>) -> Points {
        let done = extents.iter().any(|e| *e <= 0);
        let current = mins.clone();
        Points { mins, extents, current, done }
    }
}

impl Iterator for Points {
    type Item = Vec<i64>;

    fn next(&mut self) -> Option<Vec<i64>> {
        if self.done {
            return None;
        }
        let item = self.current.clone();
        self.done = true;
        for i in 0..self.current.len() {
            self.current[i] += 1;
            if self.current[i] < self.mins[i] + self.extents[i] {
                self.done = false;
                break;
            }
            self.current[i] = self.mins[i];
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_roundtrip() {
        let mut buffer = Buffer::new("b", vec![3, 2]);
        buffer.set(&[2, 1], 7).unwrap();
        assert_eq!(buffer.get(&[2, 1]), Ok(7));
        assert_eq!(buffer.get(&[0, 0]), Ok(0));
    }

    #[test]
    fn test_negative_mins() {
        let mut buffer = Buffer::with_mins("b", vec![-1, -1], vec![3, 3]);
        buffer.set(&[-1, -1], 5).unwrap();
        assert_eq!(buffer.get(&[-1, -1]), Ok(5));
        match buffer.get(&[2, 0]) {
            Err(Error::OutOfBounds { buffer, indices }) => {
                assert_eq!(buffer, "b");
                assert_eq!(indices, vec![2, 0]);
            },
            other => panic!("expected OutOfBounds, got {:?}", other)
        }
    }

    #[test]
    fn test_points_visit_first_axis_fastest() {
        let buffer = Buffer::with_mins("b", vec![0, 10], vec![2, 2]);
        let points: Vec<Vec<i64>> = buffer.points().collect();
        assert_eq!(
            points,
            vec![vec![0, 10], vec![1, 10], vec![0, 11], vec![1, 11]]
        );
    }

    #[test]
    fn test_fill() {
        let mut buffer = Buffer::new("b", vec![2, 2]);
        buffer.fill(|p| p[0] * 10 + p[1]);
        assert_eq!(buffer.get(&[1, 1]), Ok(11));
    }
}
