use std::io::Read;

use crate::integration::byte_utils::*;
use crate::utils::ArrayDynF;

pub fn write_num_vec(result: &mut Vec<u8>, array: &ArrayDynF) {
    array
        .iter()
        .flat_map(|o| o.to_be_bytes())
        .for_each(|o| result.push(o))
}

/// Array record layout: ndim, then each dim, then the values, all big-endian.
pub fn write_array(result: &mut Vec<u8>, array: &ArrayDynF) {
    write_u32(result, array.shape().len() as u32);
    for shape_item in array.shape().iter() {
        write_u32(result, *shape_item as u32);
    }
    write_num_vec(result, array);
}

fn read_num_vec(source: &mut &[u8], shape: &[usize]) -> DeserResult<ArrayDynF> {
    let length = shape.iter().copied().reduce(|a, b| a * b).unwrap_or(1);
    let mut buffer = vec![0; length * 4];
    source.read_exact(&mut buffer)?;

    let nums = buffer
        .chunks_exact(4)
        .map(|arr| f32::from_be_bytes([arr[0], arr[1], arr[2], arr[3]]))
        .collect();
    ArrayDynF::from_shape_vec(shape, nums).map_err(|_| StreamDeserError::bad_shape())
}

pub fn read_array(source: &mut &[u8]) -> DeserResult<ArrayDynF> {
    let shape_len = read_u32(source)? as usize;
    let mut shape = vec![0; shape_len];
    for item in shape.iter_mut() {
        *item = read_u32(source)? as usize;
    }

    read_num_vec(source, &shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_array_round_trip() {
        let input = array![[1.5, -2.0, 0.25], [0.0, 7.0, -0.125]].into_dyn();
        let mut bytes = Vec::new();
        write_array(&mut bytes, &input);

        let result = read_array(&mut bytes.as_slice()).unwrap();
        assert_eq!(input, result);
    }

    #[test]
    fn test_truncated_array_fails() {
        let input = array![[1.0, 2.0], [3.0, 4.0]].into_dyn();
        let mut bytes = Vec::new();
        write_array(&mut bytes, &input);
        bytes.truncate(bytes.len() - 2);

        assert!(read_array(&mut bytes.as_slice()).is_err());
    }
}
