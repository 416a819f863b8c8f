use crate::error::Error;
use crate::field::{decode, encode, Element, Precision};
use crate::index_space::IndexSpace;




/**
 * Operators that move field data between adjacent refinement levels. Both
 * operate on raw arrays of a single field, laid out with the first index
 * increasing fastest. The coarse array's dimensions times `ratio` must equal
 * the fine array's dimensions on every axis; anything else is a layout
 * mismatch.
 */
pub trait Resample: Send + Sync {

    /**
     * Fill the coarse array `dst` from the fine array `src`.
     */
    fn restrict(
        &self,
        precision: Precision,
        dst: &mut [u8],
        dst_dims: [usize; 3],
        src: &[u8],
        src_dims: [usize; 3],
        ratio: [usize; 3]) -> Result<(), Error>;

    /**
     * Fill the fine array `dst` from the coarse array `src`.
     */
    fn prolong(
        &self,
        precision: Precision,
        dst: &mut [u8],
        dst_dims: [usize; 3],
        src: &[u8],
        src_dims: [usize; 3],
        ratio: [usize; 3]) -> Result<(), Error>;
}




/**
 * Volume-average restriction and injection prolongation.
 */
#[derive(Clone, Copy, Debug, Default)]
pub struct PiecewiseConstant;




/**
 * Volume-average restriction and separable linear prolongation. Each coarse
 * value `c[i]` yields the fine pair `0.75 c[i] + 0.25 c[i-1]` and
 * `0.75 c[i] + 0.25 c[i+1]`, with the neighbors clamped at the array ends.
 * Only refinement ratios of 1 and 2 are supported.
 */
#[derive(Clone, Copy, Debug, Default)]
pub struct Linear;




// ============================================================================
impl Resample for PiecewiseConstant {
    fn restrict(&self, precision: Precision, dst: &mut [u8], dst_dims: [usize; 3], src: &[u8], src_dims: [usize; 3], ratio: [usize; 3]) -> Result<(), Error> {
        check_arrays(precision, dst, dst_dims, src, src_dims)?;
        check_ratio(dst_dims, src_dims, ratio)?;

        match precision {
            Precision::Single    => restrict_average::<f32>(dst, dst_dims, src, src_dims, ratio),
            Precision::Double    => restrict_average::<f64>(dst, dst_dims, src, src_dims, ratio),
            Precision::Quadruple => return Err(unsupported("restrict")),
        }
        Ok(())
    }

    fn prolong(&self, precision: Precision, dst: &mut [u8], dst_dims: [usize; 3], src: &[u8], src_dims: [usize; 3], ratio: [usize; 3]) -> Result<(), Error> {
        check_arrays(precision, dst, dst_dims, src, src_dims)?;
        check_ratio(src_dims, dst_dims, ratio)?;

        match precision {
            Precision::Single    => prolong_inject::<f32>(dst, dst_dims, src, src_dims, ratio),
            Precision::Double    => prolong_inject::<f64>(dst, dst_dims, src, src_dims, ratio),
            Precision::Quadruple => return Err(unsupported("prolong")),
        }
        Ok(())
    }
}




// ============================================================================
impl Resample for Linear {
    fn restrict(&self, precision: Precision, dst: &mut [u8], dst_dims: [usize; 3], src: &[u8], src_dims: [usize; 3], ratio: [usize; 3]) -> Result<(), Error> {
        PiecewiseConstant.restrict(precision, dst, dst_dims, src, src_dims, ratio)
    }

    fn prolong(&self, precision: Precision, dst: &mut [u8], dst_dims: [usize; 3], src: &[u8], src_dims: [usize; 3], ratio: [usize; 3]) -> Result<(), Error> {
        check_arrays(precision, dst, dst_dims, src, src_dims)?;
        check_ratio(src_dims, dst_dims, ratio)?;

        if ratio.iter().any(|&r| r > 2) {
            return Err(Error::Unsupported(format!("linear prolongation by ratio {:?}", ratio)));
        }
        match precision {
            Precision::Single    => prolong_linear::<f32>(dst, src, src_dims, ratio),
            Precision::Double    => prolong_linear::<f64>(dst, src, src_dims, ratio),
            Precision::Quadruple => return Err(unsupported("prolong")),
        }
        Ok(())
    }
}




fn unsupported(what: &str) -> Error {
    Error::Unsupported(format!("cannot {} quadruple precision data", what))
}




fn check_arrays(precision: Precision, dst: &[u8], dst_dims: [usize; 3], src: &[u8], src_dims: [usize; 3]) -> Result<(), Error> {
    let dst_len = dst_dims.iter().product::<usize>() * precision.size();
    let src_len = src_dims.iter().product::<usize>() * precision.size();

    if dst.len() != dst_len || src.len() != src_len {
        return Err(Error::LayoutMismatch(format!(
            "resample buffers of {} and {} bytes do not match dimensions {:?} and {:?}",
            dst.len(), src.len(), dst_dims, src_dims)));
    }
    Ok(())
}




fn check_ratio(coarse: [usize; 3], fine: [usize; 3], ratio: [usize; 3]) -> Result<(), Error> {
    if (0..3).any(|a| ratio[a] == 0 || coarse[a] * ratio[a] != fine[a]) {
        return Err(Error::LayoutMismatch(format!(
            "coarse dimensions {:?} and fine dimensions {:?} do not differ by ratio {:?}",
            coarse, fine, ratio)));
    }
    Ok(())
}




fn restrict_average<T: Element>(dst: &mut [u8], dst_dims: [usize; 3], src: &[u8], src_dims: [usize; 3], ratio: [usize; 3]) {
    let fine: Vec<T> = decode(src);
    let fine_space = IndexSpace::from_extent(src_dims);
    let r = [ratio[0] as i64, ratio[1] as i64, ratio[2] as i64];
    let count = (ratio[0] * ratio[1] * ratio[2]) as f64;

    let coarse: Vec<T> = IndexSpace::from_extent(dst_dims).iter().map(|[i, j, k]| {
        let cell = IndexSpace::new(i * r[0]..(i + 1) * r[0], j * r[1]..(j + 1) * r[1], k * r[2]..(k + 1) * r[2]);
        let sum: f64 = cell.iter().map(|index| fine[fine_space.offset_of(index)].to_f64()).sum();
        T::from_f64(sum / count)
    }).collect();

    encode(&coarse, dst)
}




fn prolong_inject<T: Element>(dst: &mut [u8], dst_dims: [usize; 3], src: &[u8], src_dims: [usize; 3], ratio: [usize; 3]) {
    let coarse: Vec<T> = decode(src);
    let coarse_space = IndexSpace::from_extent(src_dims);
    let r = [ratio[0] as i64, ratio[1] as i64, ratio[2] as i64];

    let fine: Vec<T> = IndexSpace::from_extent(dst_dims).iter().map(|[i, j, k]| {
        coarse[coarse_space.offset_of([i / r[0], j / r[1], k / r[2]])]
    }).collect();

    encode(&fine, dst)
}




fn prolong_linear<T: Element>(dst: &mut [u8], src: &[u8], src_dims: [usize; 3], ratio: [usize; 3]) {
    let mut data: Vec<f64> = decode::<T>(src).into_iter().map(T::to_f64).collect();
    let mut dims = src_dims;

    for axis in 0..3 {
        if ratio[axis] == 2 {
            data = prolong_axis(&data, dims, axis);
            dims[axis] *= 2;
        }
    }
    let fine: Vec<T> = data.into_iter().map(T::from_f64).collect();
    encode(&fine, dst)
}




/**
 * Double the resolution of `data` along one axis with the 3/4, 1/4 stencil.
 */
fn prolong_axis(data: &[f64], dims: [usize; 3], axis: usize) -> Vec<f64> {
    let mut fine_dims = dims;
    fine_dims[axis] *= 2;

    let coarse_space = IndexSpace::from_extent(dims);
    let n = dims[axis] as i64;

    IndexSpace::from_extent(fine_dims).iter().map(|index| {
        let mut c = index;
        c[axis] = index[axis] / 2;

        let mut side = c;
        side[axis] = if index[axis] % 2 == 0 { (c[axis] - 1).max(0) } else { (c[axis] + 1).min(n - 1) };

        0.75 * data[coarse_space.offset_of(c)] + 0.25 * data[coarse_space.offset_of(side)]
    }).collect()
}
