pub mod handle;
pub mod per_frame;

pub use handle::{Handle, Pool};
pub use per_frame::PerFrame;

/// Rounds `value` up to the next multiple of `alignment` (a power of two or zero).
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::align_up;

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(4096, 65536), 65536);
        assert_eq!(align_up(65536, 65536), 65536);
        assert_eq!(align_up(7, 0), 7);
    }
}
