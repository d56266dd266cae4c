use itertools::iproduct;

use crate::types::ImageShape;

/// Flat voxel index, matching the standard (row-major) layout of `ImageData`
#[allow(non_camel_case_types)] pub type Index1_u = usize;
/// `[iz, iy, ix]`
#[allow(non_camel_case_types)] pub type Index3_u = [usize; 3];

// --------------------------------------------------------------------------------
//                  Conversion between 1d and 3d indices

use std::ops::{Add, Div, Mul, Rem};

pub fn index3_to_1<T>([iz, iy, ix]: [T; 3], [_nz, ny, nx]: [T; 3]) -> T
where
    T: Mul<Output = T> + Add<Output = T>
{
    ix + (iy + iz * ny) * nx
}

#[allow(clippy::many_single_char_names)]
pub fn index1_to_3<T>(i: T, [_nz, ny, nx]: [T; 3]) -> [T; 3]
where
    T: Mul<Output = T> +
    Div<Output = T> +
    Rem<Output = T> +
    Copy
{
    let z = i / (nx * ny);
    let r = i % (nx * ny);
    let y = r / nx;
    let x = r % nx;
    [z,y,x]
}

/// Flat indices of the voxels within one step (in every dimension) of voxel
/// `i`, excluding `i` itself, together with their offsets.
pub fn neighbours(i: Index1_u, shape: ImageShape) -> impl Iterator<Item = (Index1_u, [isize; 3])> {
    let [z, y, x] = index1_to_3(i, shape);
    let [nz, ny, nx] = shape;
    let offsets = [-1_isize, 0, 1];
    iproduct!(offsets, offsets, offsets)
    .map(|(dz, dy, dx)| [dz, dy, dx])
    .filter(|&d| d != [0, 0, 0])
    .filter_map(move |d @ [dz, dy, dx]| {
        let step = |c: usize, dc: isize, n: usize| {
            let c = c as isize + dc;
            if c < 0 || c >= n as isize { None } else { Some(c as usize) }
        };
        Some((index3_to_1([step(z, dz, nz)?, step(y, dy, ny)?, step(x, dx, nx)?], shape), d))
    })
}


#[cfg(test)]
mod test_index_conversion {
    use super::*;
    use rstest::rstest;

    // -------------------- Some hand-picked examples ------------------------------
    #[rstest(/**/    size   , index3 , index1,
             // 1-d examples
             case([ 1, 1, 1], [0,0,0],   0),
             case([ 1, 1, 9], [0,0,3],   3),
             case([ 1, 8, 1], [0,4,0],   4),
             case([ 7, 1, 1], [5,0,0],   5),
             // Counting in binary: x varies fastest
             case([ 2, 2, 2], [0,0,0],   0),
             case([ 2, 2, 2], [0,0,1],   1),
             case([ 2, 2, 2], [0,1,0],   2),
             case([ 2, 2, 2], [0,1,1],   3),
             case([ 2, 2, 2], [1,0,0],   4),
             case([ 2, 2, 2], [1,0,1],   5),
             case([ 2, 2, 2], [1,1,0],   6),
             case([ 2, 2, 2], [1,1,1],   7),
             // Relation to decimal
             case([10,10,10], [3,2,1], 321),
             case([10,10,10], [6,9,7], 697),
    )]
    fn hand_picked(size: Index3_u, index3: Index3_u, index1: usize) {
        assert_eq!(index3_to_1(index3, size), index1);
        assert_eq!(index1_to_3(index1, size), index3);
    }

    #[test]
    fn flat_index_matches_ndarray_layout() {
        let shape = [3, 4, 5];
        let a = ndarray::Array3::from_shape_fn(shape, |(z, y, x)| index3_to_1([z, y, x], shape));
        let flat = a.as_slice().unwrap();
        for (i, &v) in flat.iter().enumerate() { assert_eq!(i, v) }
    }

    #[rstest(/**/ size     , index  , expected,
             case([3, 3, 3], [1,1,1], 26),  // interior
             case([3, 3, 3], [0,0,0],  7),  // corner
             case([3, 3, 3], [0,1,1], 17),  // face
             case([1, 3, 3], [0,1,1],  8),  // single slice
             case([1, 1, 1], [0,0,0],  0),
    )]
    fn number_of_neighbours(size: Index3_u, index: Index3_u, expected: usize) {
        let n = neighbours(index3_to_1(index, size), size).count();
        assert_eq!(n, expected);
    }

    // -------------------- Exhaustive roundtrip testing ------------------------------
    use proptest::prelude::*;

    // A strategy that picks 3-d index limits, and a 1-d index guaranteed to lie
    // within those bounds.
    fn size_and_in_range_index() -> impl Strategy<Value = (Index3_u, usize)> {
        [1..200_usize, 1..200_usize, 1..200_usize]
            .prop_flat_map(|i| (Just(i), 0..(i[0] * i[1] * i[2])))
    }

    proptest! {
        #[test]
        fn index_roundtrip((size, index) in size_and_in_range_index()) {
            let there = index1_to_3(index, size);
            let back  = index3_to_1(there, size);
            assert_eq!(back, index)
        }

        #[test]
        fn neighbours_are_adjacent((size, index) in size_and_in_range_index()) {
            let here = index1_to_3(index, size);
            for (j, offset) in neighbours(index, size) {
                let there = index1_to_3(j, size);
                for d in 0..3 {
                    assert_eq!(there[d] as isize - here[d] as isize, offset[d]);
                }
            }
        }
    }
}
