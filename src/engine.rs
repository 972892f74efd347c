use crate::{
    descriptor::Descriptor,
    error::PxtnResult,
    service::{Quality, RenderPreparation},
};

/// A synthesis engine: takes a project blob and produces pcm on demand.
///
/// The calls are expected in this order: [`init`](Engine::init),
/// [`set_destination_quality`](Engine::set_destination_quality),
/// [`read`](Engine::read), [`tones_ready`](Engine::tones_ready),
/// [`prepare`](Engine::prepare), then [`render`](Engine::render) until it
/// returns 0.
pub trait Engine {
    fn init(&mut self) -> PxtnResult<()>;

    fn set_destination_quality(&mut self, channels: u16, sample_rate: u32) -> PxtnResult<()>;

    /// parses the project structure from the descriptor
    fn read(&mut self, desc: &mut Descriptor<'_>) -> PxtnResult<()>;

    /// validates the loaded project and builds the voices
    fn tones_ready(&mut self) -> PxtnResult<()>;

    fn unit_count(&self) -> usize;

    fn set_unit_played(&mut self, unit: usize, played: bool) -> PxtnResult<()>;

    fn prepare(&mut self, prep: &RenderPreparation) -> PxtnResult<()>;

    /// Drops the parsed event list, a prepared render no longer needs it.
    fn release_events(&mut self);

    /// frames the prepared render will produce, 0 if nothing is prepared
    fn total_frames(&self) -> u64;

    fn quality(&self) -> Option<Quality>;

    fn project_name(&self) -> Option<&str>;

    /// Fills `buf` with interleaved samples and returns how many were written.
    /// 0 means the end of the stream.
    fn render(&mut self, buf: &mut [i16]) -> PxtnResult<usize>;
}
