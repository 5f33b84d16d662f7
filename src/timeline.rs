//! Clip placement and transition timing for multi-clip composition.
//!
//! Offsets use the cumulative formula: crossfade `i` starts one crossfade
//! length before the end of everything composed so far, and the composed
//! length then grows by the next clip minus the overlap.

use anyhow::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub clip_index: usize,
    pub start: f64,
    pub duration: f64,
}

/// Overlap between clip `after` and clip `after + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub after: usize,
    pub offset: f64,
    pub duration: f64,
    /// Composed length once this transition has been applied.
    pub cumulative: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub placements: Vec<Placement>,
    pub transitions: Vec<Transition>,
    pub total_duration: f64,
}

impl Timeline {
    /// Back-to-back placement with no overlap.
    pub fn concatenated(durations: &[f64]) -> Self {
        let mut start = 0.0;
        let placements = durations
            .iter()
            .enumerate()
            .map(|(clip_index, &duration)| {
                let p = Placement { clip_index, start, duration };
                start += duration;
                p
            })
            .collect();
        Self { placements, transitions: Vec::new(), total_duration: start }
    }

    pub fn crossfaded(durations: &[f64], crossfade: f64) -> Result<Self> {
        if durations.is_empty() {
            anyhow::bail!("timeline needs at least one clip");
        }
        if crossfade <= 0.0 {
            anyhow::bail!("crossfade duration must be positive");
        }
        if let Some((idx, d)) = durations
            .iter()
            .enumerate()
            .find(|&(_, &d)| !d.is_finite() || d <= crossfade)
        {
            anyhow::bail!(
                "clip {} lasts {:.3}s, not longer than the {:.3}s crossfade",
                idx + 1,
                d,
                crossfade
            );
        }

        let mut placements = vec![Placement { clip_index: 0, start: 0.0, duration: durations[0] }];
        let mut transitions = Vec::with_capacity(durations.len() - 1);
        let mut cumulative = durations[0];

        for (next, &next_duration) in durations.iter().enumerate().skip(1) {
            let offset = cumulative - crossfade;
            cumulative = cumulative + next_duration - crossfade;
            transitions.push(Transition { after: next - 1, offset, duration: crossfade, cumulative });
            placements.push(Placement { clip_index: next, start: offset, duration: next_duration });
        }

        Ok(Self { placements, transitions, total_duration: cumulative })
    }

    pub fn overlap_total(&self) -> f64 {
        self.transitions.iter().map(|t| t.duration).sum()
    }

    /// `filter_complex` producing `[v]` and `[a]`. Each audio input is padded
    /// or trimmed to its clip length, so audio crossfade `i` starts at the
    /// same offset and lasts as long as video crossfade `i`.
    pub fn filter_graph(&self) -> String {
        let mut parts = Vec::new();

        for p in &self.placements {
            let i = p.clip_index;
            parts.push(format!("[{i}:v]settb=AVTB,setpts=PTS-STARTPTS[v{i}]"));
            parts.push(format!(
                "[{i}:a]aresample=48000,apad,atrim=end={:.3},asetpts=PTS-STARTPTS[a{i}]",
                p.duration
            ));
        }

        if self.transitions.is_empty() {
            parts.push("[v0]null[v]".to_string());
            parts.push("[a0]anull[a]".to_string());
            return parts.join(";");
        }

        let last = self.transitions.len() - 1;
        let mut video_label = "v0".to_string();
        for (k, t) in self.transitions.iter().enumerate() {
            let out = if k == last { "v".to_string() } else { format!("vx{}", k + 1) };
            parts.push(format!(
                "[{video_label}][v{}]xfade=transition=fade:duration={:.3}:offset={:.3}[{out}]",
                t.after + 1,
                t.duration,
                t.offset
            ));
            video_label = out;
        }

        let mut audio_label = "a0".to_string();
        for (k, t) in self.transitions.iter().enumerate() {
            let out = if k == last { "a".to_string() } else { format!("ax{}", k + 1) };
            parts.push(format!(
                "[{audio_label}][a{}]acrossfade=d={:.3}:c1=tri:c2=tri[{out}]",
                t.after + 1,
                t.duration
            ));
            audio_label = out;
        }

        parts.join(";")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn two_clips_fade_at_seven_and_a_half() {
        let t = Timeline::crossfaded(&[8.0, 8.0], 0.5).unwrap();
        assert_eq!(t.transitions.len(), 1);
        assert!(approx(t.transitions[0].offset, 7.5));
        assert!(approx(t.total_duration, 15.5));
    }

    #[test]
    fn five_clips_accumulate_to_thirty_eight() {
        let t = Timeline::crossfaded(&[8.0; 5], 0.5).unwrap();
        let cumulative: Vec<f64> = t.transitions.iter().map(|x| x.cumulative).collect();
        let offsets: Vec<f64> = t.transitions.iter().map(|x| x.offset).collect();
        assert_eq!(cumulative, vec![15.5, 23.0, 30.5, 38.0]);
        assert_eq!(offsets, vec![7.5, 15.0, 22.5, 30.0]);
        assert!(approx(t.total_duration, 38.0));
        assert!(approx(t.total_duration, 5.0 * 8.0 - t.overlap_total()));
    }

    #[test]
    fn placements_start_at_transition_offsets() {
        let t = Timeline::crossfaded(&[8.0, 6.0, 7.0], 0.5).unwrap();
        let starts: Vec<f64> = t.placements.iter().map(|p| p.start).collect();
        assert_eq!(starts, vec![0.0, 7.5, 13.0]);
        assert!(approx(t.total_duration, 21.0 - 1.0));
    }

    #[test]
    fn same_inputs_give_same_timeline() {
        let a = Timeline::crossfaded(&[8.0, 8.0, 8.0], 0.5).unwrap();
        let b = Timeline::crossfaded(&[8.0, 8.0, 8.0], 0.5).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.filter_graph(), b.filter_graph());
    }

    #[test]
    fn crossfade_must_be_shorter_than_every_clip() {
        assert!(Timeline::crossfaded(&[8.0, 0.4], 0.5).is_err());
        assert!(Timeline::crossfaded(&[], 0.5).is_err());
        assert!(Timeline::crossfaded(&[8.0], 0.0).is_err());
    }

    #[test]
    fn concatenation_has_no_overlap() {
        let t = Timeline::concatenated(&[8.0, 8.0, 8.0]);
        assert!(t.transitions.is_empty());
        assert!(approx(t.total_duration, 24.0));
        assert!(approx(t.placements[2].start, 16.0));
    }

    #[test]
    fn video_and_audio_chains_share_timing() {
        let t = Timeline::crossfaded(&[8.0; 3], 0.5).unwrap();
        let graph = t.filter_graph();
        assert!(graph.contains("[v0][v1]xfade=transition=fade:duration=0.500:offset=7.500[vx1]"));
        assert!(graph.contains("[vx1][v2]xfade=transition=fade:duration=0.500:offset=15.000[v]"));
        assert!(graph.contains("[a0][a1]acrossfade=d=0.500:c1=tri:c2=tri[ax1]"));
        assert!(graph.contains("[ax1][a2]acrossfade=d=0.500:c1=tri:c2=tri[a]"));
        assert!(graph.contains("[1:a]aresample=48000,apad,atrim=end=8.000,asetpts=PTS-STARTPTS[a1]"));
        assert_eq!(graph.matches("xfade=").count(), graph.matches("acrossfade=").count());
    }
}
