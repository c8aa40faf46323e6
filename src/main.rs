use labtiming_backend::prelude::*;
use labtiming_backend::utils::TickTimer;

fn main() -> Result<()> {
    env_logger::init();
    let mut timer = TickTimer::new();

    let mut lab = Laboratory::new();
    lab.add_hal(DelayGenerator::new("DDG", &["A", "B", "C", "D"]))?
        .set_output("A", 50e-9, 10e-9, Polarity::Positive)?;
    let awg = lab.add_hal(WaveformAwg::new("Wfm1", &["CH1", "CH2"], 1e9, 2))?;
    awg.set_total_time(Some(1e-6))?;
    awg.set_waveform_segments(vec![
        WaveformSegment::constant("init", 100e-9, 0.0)?,
        WaveformSegment::gaussian("pulse", 40e-9, 0.5)?,
        WaveformSegment::elastic("wait", SegmentShape::new_const(0.0)),
        WaveformSegment::constant("read", 300e-9, 0.0)?,
    ])?;
    awg.marker_("CH1_mkr1")?
        .set_markers_to_segments(vec!["read".to_string()]);
    lab.add_hal(Acquisition::new("ACQ"))?;
    timer.tick_log("Lab setup");

    let ddg_a = ObjectPath::hal("DDG").child("A", PathRole::TriggerOutput);
    let ch1 = ObjectPath::hal("Wfm1").child("CH1", PathRole::Channel);
    let mkr = ch1.child("CH1_mkr1", PathRole::Marker);
    lab.set_trigger_source(&ch1, Some(&ddg_a))?;
    lab.set_trigger_source(&ObjectPath::hal("ACQ"), Some(&mkr))?;

    let config =
        ExperimentConfiguration::new("demo", &lab, 10e-6, &["DDG", "Wfm1"], Some("ACQ"), &[])?;
    let resolved = config.get_trigger_edges(&lab, &ObjectPath::hal("ACQ"))?;
    timer.tick_log("Trigger resolution");
    log::info!("ACQ trigger edges: {:?}", resolved.edges.to_vec());

    let diagram = config.timing_diagram(&lab)?;
    timer.tick_log("Timing diagram");
    println!("{}", config);
    for row in diagram.rows.iter() {
        println!("{:<16} {:?}", row.name, row.trigger_times);
    }
    Ok(())
}
