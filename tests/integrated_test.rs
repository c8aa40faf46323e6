use labtiming_backend::diagram::{DiagramShape, TimeUnit};
use labtiming_backend::prelude::*;
use labtiming_backend::segment::SegmentDuration;
use serde_json::json;

fn ddg_out(name: &str) -> ObjectPath {
    ObjectPath::hal("DDG").child(name, PathRole::TriggerOutput)
}
fn channel(awg: &str, ch: &str) -> ObjectPath {
    ObjectPath::hal(awg).child(ch, PathRole::Channel)
}
fn marker(awg: &str, ch: &str, mkr: &str) -> ObjectPath {
    channel(awg, ch).child(mkr, PathRole::Marker)
}
fn acq() -> ObjectPath {
    ObjectPath::hal("ACQ")
}

// DDG/A -> Wfm1/CH1, Wfm1/CH1_mkr1 (trigger mode) -> MW, Wfm1/CH1_mkr2 (segments) -> ACQ
fn chained_lab() -> Laboratory {
    let mut lab = Laboratory::new();
    lab.add_hal(DelayGenerator::new("DDG", &["A", "B", "C", "D"]))
        .unwrap()
        .set_output("A", 50e-9, 10e-9, Polarity::Positive)
        .unwrap();

    let awg = lab.add_hal(WaveformAwg::new("Wfm1", &["CH1"], 1e9, 2)).unwrap();
    awg.set_waveform_segments(vec![
        WaveformSegment::constant("init", 100e-9, 0.0).unwrap(),
        WaveformSegment::gaussian("pulse", 40e-9, 0.5).unwrap(),
        WaveformSegment::constant("read", 60e-9, 0.0).unwrap(),
    ])
    .unwrap();
    let mkr1 = awg.marker_("CH1_mkr1").unwrap();
    mkr1.set_markers_to_trigger();
    mkr1.set_trig_pulse_delay(100e-9).unwrap();
    mkr1.set_trig_pulse_length(20e-9).unwrap();
    awg.marker_("CH1_mkr2")
        .unwrap()
        .set_markers_to_segments(vec!["read".to_string()]);

    lab.add_hal(MicrowaveSource::new("MW"))
        .unwrap()
        .set_mode(MwMode::PulseModulated);
    lab.add_hal(Acquisition::new("ACQ"))
        .unwrap()
        .set_data_processor(Some("ddc"));
    lab.add_processor(Processor::new("ddc"))
        .set_property("IF", json!(25e6));

    lab.set_trigger_source(&channel("Wfm1", "CH1"), Some(&ddg_out("A")))
        .unwrap();
    lab.set_trigger_source(&ObjectPath::hal("MW"), Some(&marker("Wfm1", "CH1", "CH1_mkr1")))
        .unwrap();
    lab.set_trigger_source(&acq(), Some(&marker("Wfm1", "CH1", "CH1_mkr2")))
        .unwrap();
    lab
}

#[test]
fn pulse_edge_follows_consumer_polarity() {
    let mut lab = Laboratory::new();
    lab.add_hal(DelayGenerator::new("DDG", &["A", "B", "C", "D"]))
        .unwrap()
        .set_output("A", 50e-9, 400e-9, Polarity::Negative)
        .unwrap();
    lab.add_hal(Acquisition::new("ACQ")).unwrap();
    lab.set_trigger_source(&acq(), Some(&ddg_out("A"))).unwrap();
    lab.set_input_trigger_edge(&acq(), Polarity::Positive).unwrap();

    // Falling pulse watched for a rising edge: fires when the pulse ends
    let resolved = lab.get_trigger_edges(&acq()).unwrap();
    assert_eq!(resolved.edges.to_vec(), vec![50e-9 + 400e-9]);
    assert_eq!(resolved.gated.row(0).to_vec(), vec![0.0, 50e-9]);

    lab.set_input_trigger_edge(&acq(), Polarity::Negative).unwrap();
    let resolved = lab.get_trigger_edges(&acq()).unwrap();
    assert_eq!(resolved.edges.to_vec(), vec![50e-9]);
    assert_eq!(resolved.gated.row(0).to_vec(), vec![50e-9, 50e-9 + 400e-9]);
}

#[test]
fn three_device_chain() {
    let lab = chained_lab();

    let mw = lab.get_trigger_edges(&ObjectPath::hal("MW")).unwrap();
    assert_eq!(mw.edges.to_vec(), vec![50e-9 + 100e-9]);
    assert_eq!(
        mw.gated.row(0).to_vec(),
        vec![50e-9 + 100e-9, 50e-9 + (100e-9 + 20e-9)]
    );
    assert_eq!(mw.chain.len(), 2);
    assert_eq!(mw.chain[1].source, ddg_out("A"));

    // "read" starts at sample 140
    let acq_edges = lab.get_trigger_edges(&acq()).unwrap();
    assert_eq!(acq_edges.edges.to_vec(), vec![50e-9 + 140.0 / 1e9]);
    assert_eq!(
        acq_edges.gated.row(0).to_vec(),
        vec![50e-9 + 140.0 / 1e9, 50e-9 + 200.0 / 1e9]
    );
}

#[test]
fn edge_count_is_product_of_branching() {
    let mut lab = chained_lab();
    let bits: Vec<u8> = (0..200).map(|i| u8::from(i % 50 == 10)).collect();
    lab.hal_as_::<WaveformAwg>("Wfm1")
        .unwrap()
        .marker_("CH1_mkr2")
        .unwrap()
        .set_markers_to_arbitrary(bits)
        .unwrap();
    let resolved = lab.get_trigger_edges(&acq()).unwrap();
    assert_eq!(resolved.edges.len(), 4);
    assert_eq!(resolved.edges[3], 50e-9 + 160.0 / 1e9);

    // Reading the pattern back as one pulse is refused
    let target = PropertyTarget::new(marker("Wfm1", "CH1", "CH1_mkr2"), "TrigPulseDelay");
    assert!(matches!(
        lab.get_property(&target),
        Err(TimingError::TooManyMarkerEdges { edges: 8, .. })
    ));
}

#[test]
fn cyclic_sources_are_detected() {
    let mut lab = Laboratory::new();
    lab.add_hal(WaveformAwg::new("Wfm1", &["CH1"], 1e9, 2)).unwrap();
    lab.add_hal(WaveformAwg::new("Wfm2", &["CH1"], 1e9, 2)).unwrap();
    lab.add_hal(Acquisition::new("ACQ")).unwrap();
    lab.set_trigger_source(&channel("Wfm1", "CH1"), Some(&marker("Wfm2", "CH1", "CH1_mkr1")))
        .unwrap();
    lab.set_trigger_source(&channel("Wfm2", "CH1"), Some(&marker("Wfm1", "CH1", "CH1_mkr1")))
        .unwrap();
    lab.set_trigger_source(&acq(), Some(&marker("Wfm1", "CH1", "CH1_mkr2")))
        .unwrap();
    assert!(matches!(
        lab.get_trigger_edges(&acq()),
        Err(TimingError::CyclicTriggerDependency { .. })
    ));
}

#[test]
fn undeclared_dependency_is_reported() {
    let lab = chained_lab();
    let config =
        ExperimentConfiguration::new("no_ddg", &lab, 1e-6, &["Wfm1", "MW"], Some("ACQ"), &[])
            .unwrap();
    // Plain resolution does not care about membership
    assert!(config.get_trigger_edges(&lab, &acq()).is_ok());
    match config.check_trigger_dependencies(&lab, &acq()) {
        Err(TimingError::UndeclaredTriggerDependency { device, .. }) => assert_eq!(device, "DDG"),
        other => panic!("expected an undeclared dependency, got {:?}", other.map(|r| r.edges)),
    }
    assert!(config.timing_diagram(&lab).is_err());
}

#[test]
fn save_then_update_is_idempotent() {
    let mut lab = chained_lab();
    let mut config = ExperimentConfiguration::new(
        "full",
        &lab,
        1e-6,
        &["DDG", "Wfm1", "MW"],
        Some("ACQ"),
        &[],
    )
    .unwrap();
    let before: Vec<_> = config
        .hal_names()
        .iter()
        .map(|name| lab.hal(name).unwrap().get_current_config())
        .collect();
    config.update(&mut lab).unwrap();
    let after: Vec<_> = config
        .hal_names()
        .iter()
        .map(|name| lab.hal(name).unwrap().get_current_config())
        .collect();
    assert_eq!(before, after);
    assert_eq!(config.snapshot().hals, after);
    assert_eq!(config.proc_names(), &["ddc".to_string()]);
}

#[test]
fn update_reverts_external_changes() {
    let mut lab = chained_lab();
    let mut config =
        ExperimentConfiguration::new("full", &lab, 1e-6, &["DDG", "Wfm1", "MW"], Some("ACQ"), &[])
            .unwrap();
    let delay = PropertyTarget::new(ddg_out("A"), "TrigPulseDelay");
    let amp = PropertyTarget::new(channel("Wfm1", "CH1"), "Amplitude");
    lab.set_property(&delay, &json!(300e-9)).unwrap();
    lab.set_property(&amp, &json!(0.25)).unwrap();
    lab.processor_("ddc").unwrap().set_property("IF", json!(10e6));
    assert_eq!(lab.get_property(&delay).unwrap(), json!(300e-9));

    config.update(&mut lab).unwrap();
    assert_eq!(lab.get_property(&delay).unwrap(), json!(50e-9));
    assert_eq!(lab.get_property(&amp).unwrap(), json!(1.0));
    assert_eq!(lab.processor("ddc").unwrap().get_property("IF").unwrap(), json!(25e6));
    assert_eq!(
        lab.get_trigger_edges(&ObjectPath::hal("MW")).unwrap().edges.to_vec(),
        vec![50e-9 + 100e-9]
    );
}

#[test]
fn snapshot_dictionary_shape() {
    let lab = chained_lab();
    let config =
        ExperimentConfiguration::new("full", &lab, 1e-6, &["DDG"], Some("ACQ"), &[]).unwrap();
    let dict = config.get_config().unwrap();
    assert_eq!(dict["RepetitionTime"], json!(1e-6));
    assert_eq!(dict["HALs"][0]["Name"], json!("DDG"));
    assert_eq!(dict["HALs"][1]["Type"], json!("ACQ"));
    assert_eq!(dict["PROCs"][0]["Name"], json!("ddc"));
    assert_eq!(dict["SPECs"], json!([]));
    assert_eq!(dict["WaveformMapping"], json!({"waveforms": {}, "digital": {}}));
}

#[test]
fn rejected_configuration_changes_no_device() {
    let mut lab = chained_lab();
    let mut config =
        ExperimentConfiguration::new("pair", &lab, 1e-6, &["DDG", "Wfm1"], None, &[]).unwrap();
    let mut dict = config.get_config().unwrap();
    dict["HALs"][0]["Outputs"]["A"]["TrigPulseDelay"] = json!(3e-7);
    dict["HALs"][1]["Channels"][0]["Name"] = json!("CHX");

    assert!(config.update_config(&mut lab, &dict, true).is_err());
    let delay = PropertyTarget::new(ddg_out("A"), "TrigPulseDelay");
    assert_eq!(lab.get_property(&delay).unwrap(), json!(5e-8));
    assert_eq!(config.snapshot().hals[0]["Outputs"]["A"]["TrigPulseDelay"], json!(5e-8));

    // The valid half alone goes through
    dict["HALs"][1]["Channels"][0]["Name"] = json!("CH1");
    config.update_config(&mut lab, &dict, true).unwrap();
    assert_eq!(lab.get_property(&delay).unwrap(), json!(3e-7));
}

#[test]
fn specifications_are_applied_last() {
    let mut lab = chained_lab();
    let mut spec = ExperimentSpecification::new("timing");
    spec.add("MwDelay", json!(200e-9)).unwrap();
    spec.set_destination("MwDelay", PropertyTarget::new(ddg_out("A"), "TrigPulseDelay"))
        .unwrap();
    lab.add_specification(spec);

    let mut config = ExperimentConfiguration::new(
        "spec",
        &lab,
        1e-6,
        &["DDG", "Wfm1", "MW"],
        Some("ACQ"),
        &["timing"],
    )
    .unwrap();
    let length = PropertyTarget::new(ddg_out("A"), "TrigPulseLength");
    lab.set_property(&length, &json!(99e-9)).unwrap();

    config.init(&mut lab).unwrap();
    let ddg = lab.hal_as::<DelayGenerator>("DDG").unwrap();
    assert_eq!(ddg.output("A").unwrap().delay(), 200e-9);
    assert_eq!(ddg.output("A").unwrap().length(), 10e-9);
    assert!(ddg.locks().is_empty());

    // A copy carries the specifications along
    lab.set_property(&PropertyTarget::new(ddg_out("A"), "TrigPulseDelay"), &json!(0.0))
        .unwrap();
    let copy = ExperimentConfiguration::copy_from("spec2", &mut lab, &config).unwrap();
    assert_eq!(copy.spec_names(), &["timing".to_string()]);
    assert_eq!(
        lab.hal_as::<DelayGenerator>("DDG").unwrap().output("A").unwrap().delay(),
        200e-9
    );
}

#[test]
fn registry_is_get_or_create() {
    let mut lab = chained_lab();
    let awg = lab.add_hal(WaveformAwg::new("Wfm1", &["CH1"], 1e9, 2)).unwrap();
    assert_eq!(awg.waveform().segments().len(), 3);
    assert!(matches!(
        lab.add_hal(WaveformAwg::new("Wfm1", &["CH1"], 1e9, 4)),
        Err(TimingError::IncompatibleHal { .. })
    ));
    assert!(matches!(
        lab.add_hal(VoltageSource::new("MW")),
        Err(TimingError::IncompatibleHal { .. })
    ));
}

#[test]
fn elastic_segments_share_leftover_time() {
    let mut lab = Laboratory::new();
    let awg = lab.add_hal(WaveformAwg::new("Wfm1", &["CH1"], 1e9, 1)).unwrap();
    awg.set_waveform_segments(vec![
        WaveformSegment::constant("a", 20e-9, 0.0).unwrap(),
        WaveformSegment::elastic_weighted("gap1", 1.0, SegmentShape::new_const(0.0)).unwrap(),
        WaveformSegment::constant("b", 40e-9, 0.0).unwrap(),
        WaveformSegment::elastic_weighted("gap2", 3.0, SegmentShape::new_const(0.0)).unwrap(),
    ])
    .unwrap();
    assert!(matches!(
        awg.num_samples(),
        Err(TimingError::InvalidElasticLayout { .. })
    ));
    awg.set_total_time(Some(200e-9)).unwrap();
    assert_eq!(awg.waveform().segment_lengths().unwrap(), vec![20, 35, 40, 105]);
    assert_eq!(awg.num_samples().unwrap(), 200);

    awg.set_total_time(Some(50e-9)).unwrap();
    assert!(matches!(
        awg.num_samples(),
        Err(TimingError::InvalidElasticLayout { .. })
    ));
}

fn mapped_lab() -> (Laboratory, ExperimentConfiguration) {
    let mut lab = Laboratory::new();
    lab.add_hal(WaveformAwg::new("Wfm1", &["CH1"], 1e9, 2)).unwrap();
    lab.add_hal(WaveformAwg::new("Wfm2", &["CH1"], 1e9, 2)).unwrap();
    let mut config =
        ExperimentConfiguration::new("wfm", &lab, 1e-6, &["Wfm1", "Wfm2"], None, &[]).unwrap();
    let mut mapper = WaveformMapper::new();
    mapper.add_waveform("qubit", "Wfm1");
    mapper.add_waveform("readout", "Wfm2");
    mapper.add_digital("gate", marker("Wfm2", "CH1", "CH1_mkr1"));
    mapper.add_digital("trig", marker("Wfm1", "CH1", "CH1_mkr2"));
    config.map_waveforms(&lab, mapper).unwrap();
    (lab, config)
}

fn qubit_generic(readout_length: f64) -> WaveformGeneric {
    let mut generic = WaveformGeneric::new();
    generic.add_waveform_segment("qubit", WaveformSegment::constant("a", 30e-9, 0.0).unwrap());
    generic.add_waveform_segment("qubit", WaveformSegment::gaussian("b", 40e-9, 0.8).unwrap());
    generic.add_waveform_segment("qubit", WaveformSegment::constant("c", 30e-9, 0.0).unwrap());
    generic.add_waveform_segment(
        "readout",
        WaveformSegment::constant("r", readout_length, 0.3).unwrap(),
    );
    generic.set_digital_segments("gate", "qubit", &["b"], Polarity::Positive);
    generic.set_digital_trigger("trig", 10e-9, 5e-9, Polarity::Positive);
    generic
}

#[test]
fn cross_device_marker_needs_matching_sample_counts() {
    let (mut lab, config) = mapped_lab();
    match config.update_waveforms(&mut lab, &qubit_generic(80e-9), &[]) {
        Err(TimingError::SampleCountMismatch {
            marker_samples,
            reference_samples,
            ..
        }) => assert_eq!((marker_samples, reference_samples), (100, 80)),
        other => panic!("expected a sample count mismatch, got {:?}", other.map(|h| h.len())),
    }

    config
        .update_waveforms(&mut lab, &qubit_generic(100e-9), &[])
        .unwrap();
    let awg = lab.hal_as::<WaveformAwg>("Wfm2").unwrap();
    let gate = awg.marker("CH1_mkr1").unwrap();
    assert_eq!(gate.status(), MarkerStatus::Arbitrary);
    assert_eq!(gate.arbitrary().len(), 100);
    assert!(gate.arbitrary()[30..70].iter().all(|&b| b == 1));
    assert_eq!(gate.arbitrary().iter().filter(|&&b| b == 1).count(), 40);

    let trig = lab.hal_as::<WaveformAwg>("Wfm1").unwrap().marker("CH1_mkr2").unwrap();
    assert_eq!(trig.status(), MarkerStatus::Trigger);
}

#[test]
fn failed_waveform_update_leaves_awgs_untouched() {
    let (mut lab, config) = mapped_lab();
    let mut generic = qubit_generic(100e-9);
    generic.set_digital_trigger("trig", -10e-9, 5e-9, Polarity::Positive);
    assert!(matches!(
        config.update_waveforms(&mut lab, &generic, &[]),
        Err(TimingError::InvalidValue { .. })
    ));
    for name in ["Wfm1", "Wfm2"] {
        let awg = lab.hal_as::<WaveformAwg>(name).unwrap();
        assert!(awg.waveform().segments().is_empty());
    }
    let trig = lab.hal_as::<WaveformAwg>("Wfm1").unwrap().marker("CH1_mkr2").unwrap();
    assert_eq!(trig.status(), MarkerStatus::None);
}

#[test]
fn marker_segments_must_exist_on_waveform() {
    let (mut lab, config) = mapped_lab();
    let mut generic = qubit_generic(100e-9);
    generic.set_digital_segments("trig", "qubit", &["z"], Polarity::Positive);
    assert!(matches!(
        config.update_waveforms(&mut lab, &generic, &[]),
        Err(TimingError::UnknownSegment { .. })
    ));
    let trig = lab.hal_as::<WaveformAwg>("Wfm1").unwrap().marker("CH1_mkr2").unwrap();
    assert_eq!(trig.status(), MarkerStatus::None);

    generic.set_digital_segments("trig", "qubit", &["c"], Polarity::Positive);
    config.update_waveforms(&mut lab, &generic, &[]).unwrap();
    let trig = lab.hal_as::<WaveformAwg>("Wfm1").unwrap().marker("CH1_mkr2").unwrap();
    assert_eq!(trig.status(), MarkerStatus::Segments);
}

#[test]
fn variable_handles_write_through() {
    let (mut lab, config) = mapped_lab();
    let requests = [
        VariableRequest::new("pi_len", "qubit", "b", "Duration"),
        VariableRequest::new("pi_amp", "qubit", "b", "amplitude"),
    ];
    let handles = config
        .update_waveforms(&mut lab, &qubit_generic(100e-9), &requests)
        .unwrap();
    assert_eq!(handles.len(), 2);
    assert_eq!(handles[1].get(&lab).unwrap(), json!(0.8));

    handles[0].set(&mut lab, &json!(50e-9)).unwrap();
    handles[1].set(&mut lab, &json!(0.4)).unwrap();
    let seg = lab
        .hal_as::<WaveformAwg>("Wfm1")
        .unwrap()
        .waveform()
        .segment("b")
        .unwrap()
        .clone();
    assert_eq!(seg.duration, SegmentDuration::Fixed(50e-9));
    assert_eq!(seg.shape.arg("amplitude"), Some(0.4));

    assert!(matches!(
        config.update_waveforms(
            &mut lab,
            &qubit_generic(100e-9),
            &[VariableRequest::new("x", "qubit", "z", "Duration")]
        ),
        Err(TimingError::UnknownSegment { .. })
    ));
    assert!(matches!(
        config.update_waveforms(
            &mut lab,
            &qubit_generic(100e-9),
            &[VariableRequest::new("x", "cavity", "a", "Duration")]
        ),
        Err(TimingError::UnmappedWaveform(_))
    ));
}

#[test]
fn timing_diagram_rows() {
    let lab = chained_lab();
    let config = ExperimentConfiguration::new(
        "full",
        &lab,
        1e-6,
        &["DDG", "Wfm1", "MW"],
        Some("ACQ"),
        &[],
    )
    .unwrap();
    let diagram = config.timing_diagram(&lab).unwrap();
    assert_eq!(diagram.unit, TimeUnit::Ns);
    assert_eq!(diagram.end, 1e-6 * 1e9);
    let names: Vec<&str> = diagram.rows.iter().map(|row| row.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "DDG/A",
            "DDG/B",
            "DDG/C",
            "DDG/D",
            "Wfm1/CH1",
            "Wfm1/CH1/CH1_mkr1",
            "Wfm1/CH1/CH1_mkr2",
            "MW",
            "ACQ"
        ]
    );
    assert_eq!(diagram.rows[0].trigger_times, vec![0.0]);
    let mw = &diagram.rows[7];
    assert_eq!(mw.shapes.len(), 1);
    assert!(matches!(mw.shapes[0], DiagramShape::Rectangle { .. }));

    let slow = ExperimentConfiguration::new("slow", &lab, 1e-3, &["DDG"], None, &[]).unwrap();
    assert_eq!(slow.timing_diagram(&lab).unwrap().unit, TimeUnit::Us);
}
