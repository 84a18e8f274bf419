use spike_binner::features::feature_set;
use spike_binner::{bin_spikes, BinningConfig, Label, SpikeEvent, StimulusDescriptor};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    // Stimulus log: a placeholder followed by alternating white/black screens
    let mut descriptors = vec![StimulusDescriptor::new(0.0).with_field("name", "intro")];
    for i in 0..6 {
        let color = if i % 2 == 0 { "white" } else { "black" };
        let duration = if i % 3 == 0 { 500.0 } else { 300.0 };
        descriptors.push(StimulusDescriptor::new(duration).with_field("bgColor", color));
    }

    // One onset per stimulus after the placeholder
    let markers: Vec<f64> = (0..6).map(|i| 2.0 + i as f64).collect();

    // A few channels firing at different rates
    let mut spikes = Vec::new();
    for channel in [12_i64, 13, 21] {
        for k in 0..400 {
            let t = 1.5 + k as f64 * 0.0173 * (1.0 + channel as f64 / 50.0);
            let unit = if k % 5 == 0 { Label::from("noise") } else { Label::Int(1) };
            spikes.push(SpikeEvent::new(Label::Int(channel), unit, t));
        }
    }

    let binned = bin_spikes(&spikes, &markers, &descriptors, &BinningConfig::default())?;
    let meta = &binned.metadata;

    println!("Tensor shape: {:?}", meta.shape);
    println!("Bin width: {} ms, {} bins", meta.time_bin_ms, meta.max_time_bins);
    println!(
        "Channels: {}",
        binned.channels.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
    );
    println!(
        "Units: {}",
        binned.units.iter().map(|u| u.to_string()).collect::<Vec<_>>().join(", ")
    );
    println!(
        "Spikes binned: {} ({} outside stimuli)",
        meta.total_spikes, meta.dropped_spikes
    );

    // Per-interval totals
    for (i, interval) in binned.intervals.iter().enumerate() {
        let count: u64 = binned
            .tensor
            .index_axis(ndarray::Axis(0), i)
            .iter()
            .map(|&c| u64::from(c))
            .sum();
        println!(
            "  Stimulus {}: {:.3}-{:.3} s, {} spikes",
            i + 1,
            interval.start,
            interval.end,
            count
        );
    }

    let set = feature_set(&binned.tensor, &descriptors, "bgColor", "white")?;
    println!(
        "Feature matrix: {} x {}, {} positive labels",
        set.features.nrows(),
        set.features.ncols(),
        set.positives()
    );

    Ok(())
}
