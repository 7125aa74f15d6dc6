use log::debug;

/// Number of fixed output series per capture, which is also the exact field
/// count a sample row must carry to be accepted.
pub const CHANNEL_COUNT: usize = 8;

const FIELD_SEPARATOR: char = ',';

/// Convert raw captured text into the per-channel integer series.
///
/// Each line is one sample row: exactly eight comma-separated integer
/// fields. Rows with any other field count, or with any field that fails to
/// parse after whitespace trimming, are dropped whole; a partially numeric
/// row never contributes to any channel. This is a lossy data-quality
/// filter, not an error path. Row order is preserved within each channel,
/// and channels with no valid row stay empty, which is valid output.
pub fn parse_frames(text: &str) -> [Vec<i32>; CHANNEL_COUNT] {
    let mut channels: [Vec<i32>; CHANNEL_COUNT] = Default::default();
    let mut dropped = 0usize;

    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        if fields.len() != CHANNEL_COUNT {
            dropped += 1;
            continue;
        }
        match fields
            .iter()
            .map(|field| field.trim().parse::<i32>())
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(row) => {
                for (channel, value) in channels.iter_mut().zip(row) {
                    channel.push(value);
                }
            }
            Err(_) => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!("dropped {dropped} malformed sample rows");
    }
    channels
}
