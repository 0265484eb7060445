pub(crate) fn find_best_audio_stream(
    input: &ffmpeg_next::format::context::Input,
) -> Option<ffmpeg_next::format::stream::Stream> {
    input.streams().best(ffmpeg_next::media::Type::Audio)
}
