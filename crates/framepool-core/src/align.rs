///GPU APIs are picky about where a copy or a binding may start.
///
///Uploads through `wgpu::Queue::write_buffer` must start at, and be sized to, a multiple of
///COPY_BUFFER_ALIGNMENT (4 bytes). Dynamic offsets used when binding a region of a larger
///allocation must be a multiple of `min_uniform_buffer_offset_alignment`, which defaults to 256.
///
///Packed streaming writes therefore round their base offset up before landing in an allocation.
pub trait Align {
    const COPY_BUFFER_ALIGNMENT: u64 = 4;

    fn calculate_alignment(&self, alignment: u64) -> u64;
    fn align_to(&self, alignment: u64) -> u64;
    fn align_for_copy(&self) -> u64;
}

impl Align for u64 {
    fn calculate_alignment(&self, alignment: u64) -> u64 {
        if alignment <= 1 {
            return 0;
        }
        let remainder = self % alignment;
        if remainder == 0 {
            0
        } else {
            alignment - remainder
        }
    }

    fn align_to(&self, alignment: u64) -> u64 {
        self + self.calculate_alignment(alignment)
    }

    fn align_for_copy(&self) -> u64 {
        self.align_to(Self::COPY_BUFFER_ALIGNMENT)
    }
}

pub trait Padding {
    //Pad the vector to the next multiple of 4.
    fn pad_to_copy(&mut self) -> usize;
}

impl<T: Clone + Default> Padding for Vec<T> {
    fn pad_to_copy(&mut self) -> usize {
        let alignment = (self.len() as u64).calculate_alignment(u64::COPY_BUFFER_ALIGNMENT) as usize;
        if alignment != 0 {
            self.resize(self.len() + alignment, T::default());
        }
        alignment
    }
}
