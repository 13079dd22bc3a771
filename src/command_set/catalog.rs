//! Built-in command sets for the supported instrument kinds.

use super::{CommandSet, ErrorQuery, FieldSpec, Template, TraceCommands};
use crate::error::CommandSetError;

/// Kinds known to [`builtin`].
pub const BUILTIN_KINDS: [&str; 4] = ["afg1062", "fsv30", "ap2061a", "e3631a"];

/// Look up a built-in command set by kind (case-insensitive).
pub fn builtin(kind: &str) -> Result<CommandSet, CommandSetError> {
    match kind.to_ascii_lowercase().as_str() {
        "afg1062" => Ok(afg1062()),
        "fsv30" => Ok(fsv30()),
        "ap2061a" => Ok(ap2061a()),
        "e3631a" => Ok(e3631a()),
        _ => Err(CommandSetError::UnknownKind(kind.to_string())),
    }
}

/// All built-in command sets, in [`BUILTIN_KINDS`] order.
pub fn builtins() -> Vec<CommandSet> {
    vec![afg1062(), fsv30(), ap2061a(), e3631a()]
}

/// Tektronix AFG1062 arbitrary function generator.
pub fn afg1062() -> CommandSet {
    let mut set = CommandSet::new("afg1062", "Tektronix AFG1062 function generator")
        .field(
            FieldSpec::text("function", "SOUR{channel}:FUNC {value}", "SOUR{channel}:FUNC?")
                .with_label("Function")
                .with_default("SIN"),
        )
        .field(
            FieldSpec::numeric(
                "frequency_hz",
                "SOUR{channel}:FREQ {value}",
                "SOUR{channel}:FREQ?",
                0.5,
            )
            .with_label("Frequency")
            .with_unit("Hz"),
        )
        .field(
            FieldSpec::numeric(
                "voltage_vpp",
                "SOUR{channel}:VOLT {value}",
                "SOUR{channel}:VOLT?",
                0.05,
            )
            .with_label("Amplitude")
            .with_unit("Vpp"),
        )
        .field(
            FieldSpec::numeric(
                "offset_v",
                "SOUR{channel}:VOLT:OFFS {value}",
                "SOUR{channel}:VOLT:OFFS?",
                0.01,
            )
            .with_label("Offset")
            .with_unit("V"),
        )
        .field(
            FieldSpec::text("load", "OUTP{channel}:LOAD {value}", "OUTP{channel}:LOAD?")
                .with_label("Load"),
        )
        .field(
            FieldSpec::switch(
                "output_enabled",
                "OUTP{channel}:STAT {value}",
                "OUTP{channel}:STAT?",
            )
            .with_label("Output")
            .with_default(true),
        );
    set.clear_command = Some(Template::new("*CLS"));
    set.reset_command = Some(Template::new("*RST"));
    set.error_query = Some(ErrorQuery::new("SYST:ERR?"));
    set.shutdown_commands = vec![
        Template::new("OUTPut1:STATe OFF"),
        Template::new("OUTPut2:STATe OFF"),
    ];
    set
}

/// Rohde & Schwarz FSV30 signal and spectrum analyzer.
///
/// Every setting is followed by `*OPC?` so the analyzer has applied it before
/// the next command is sent.
pub fn fsv30() -> CommandSet {
    let mut set = CommandSet::new("fsv30", "Rohde & Schwarz FSV30 spectrum analyzer")
        .field(
            FieldSpec::numeric("center_hz", "SENS:FREQ:CENT {value}", "SENS:FREQ:CENT?", 1.0)
                .with_label("Center")
                .with_unit("Hz"),
        )
        .field(
            FieldSpec::numeric("span_hz", "SENS:FREQ:SPAN {value}", "SENS:FREQ:SPAN?", 1.0)
                .with_label("Span")
                .with_unit("Hz"),
        )
        .field(
            FieldSpec::numeric("rbw_hz", "SENS:BAND:RES {value}", "SENS:BAND:RES?", 1.0)
                .with_label("RBW")
                .with_unit("Hz"),
        )
        .field(
            FieldSpec::numeric("vbw_hz", "SENS:BAND:VID {value}", "SENS:BAND:VID?", 1.0)
                .with_label("VBW")
                .with_unit("Hz"),
        )
        .field(
            FieldSpec::text("sweep_type", "SENS:SWE:TYPE {value}", "SENS:SWE:TYPE?")
                .with_label("Sweep type")
                .with_default("AUTO"),
        );
    set.clear_command = Some(Template::new("*CLS"));
    set.reset_command = Some(Template::new("*RST"));
    set.setup_commands = vec![
        Template::new("INIT:CONT OFF"),
        Template::new("ABOR"),
        Template::new("SYST:DISP:UPD ON"),
    ];
    set.sync_query = Some(Template::new("*OPC?"));
    set.error_query = Some(ErrorQuery::new("SYST:ERR?"));
    set.trace = Some(
        TraceCommands::new("*OPC?", "TRAC:DATA:X? TRACE{trace}", "TRAC:DATA? TRACE{trace}", "Hz")
            .with_trigger("INIT:IMM"),
    );
    set
}

/// Apex AP2061A optical spectrum analyzer (raw socket, port 5900).
///
/// `SPSWP1` runs a single sweep and answers with the trace number; the trace
/// data replies start with the sample count.
pub fn ap2061a() -> CommandSet {
    let mut set = CommandSet::new("ap2061a", "Apex AP2061A optical spectrum analyzer")
        .field(
            FieldSpec::text("polarization", "SPPOLAR {value}", "SPPOLAR?")
                .with_label("Polarization")
                .with_default("1+2"),
        )
        .field(
            FieldSpec::numeric("center_nm", "SPCTRWL {value}", "SPCTRWL?", 0.001)
                .with_label("Center")
                .with_unit("nm"),
        )
        .field(
            FieldSpec::numeric("span_nm", "SPSPANWL {value}", "SPSPANWL?", 0.001)
                .with_label("Span")
                .with_unit("nm"),
        );
    set.trace = Some(TraceCommands::new("SPSWP1", "SPDATAWL{trace}", "SPDATAD{trace}", "nm"));
    set
}

/// Agilent E3631A triple-output power supply.
///
/// The `{channel}` is the output name: `P6V`, `P25V` or `N25V`.
pub fn e3631a() -> CommandSet {
    let mut set = CommandSet::new("e3631a", "Agilent E3631A triple power supply")
        .field(
            FieldSpec::numeric("voltage_v", "VOLT {value}", "VOLT?", 0.01)
                .with_label("Voltage")
                .with_unit("V"),
        )
        .field(
            FieldSpec::numeric("current_a", "CURR {value}", "CURR?", 0.005)
                .with_label("Current limit")
                .with_unit("A"),
        )
        .field(
            FieldSpec::switch("output_enabled", "OUTP {value}", "OUTP?")
                .with_label("Output")
                .with_default(true),
        );
    set.default_channel = "P6V".to_string();
    set.clear_command = Some(Template::new("*CLS"));
    set.reset_command = Some(Template::new("*RST"));
    set.preamble = vec![Template::new("INST:SEL {channel}")];
    set.error_query = Some(ErrorQuery::new("SYST:ERR?"));
    set.shutdown_commands = vec![Template::new("OUTP OFF")];
    set
}

/// Normalise an OSA polarization alias to the analyzer's channel name.
///
/// Returns `None` for unknown aliases.
pub fn osa_channel(alias: &str) -> Option<&'static str> {
    match alias.trim().to_ascii_lowercase().as_str() {
        "sum" | "total" | "0" | "1+2" => Some("1+2"),
        "both" | "1&2" | "dual" => Some("1&2"),
        "1" | "ch1" | "channel1" => Some("1"),
        "2" | "ch2" | "channel2" => Some("2"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_validates() {
        for set in builtins() {
            set.validate().unwrap();
        }
        assert_eq!(
            builtins().iter().map(|s| s.kind.as_str()).collect::<Vec<_>>(),
            BUILTIN_KINDS
        );
    }

    #[test]
    fn builtins_survive_toml() {
        for set in builtins() {
            let text = set.to_toml_string().unwrap();
            assert_eq!(CommandSet::from_toml_str(&text).unwrap(), set);
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(builtin("AFG1062").unwrap().kind, "afg1062");
        assert!(matches!(
            builtin("hp8560"),
            Err(CommandSetError::UnknownKind(kind)) if kind == "hp8560"
        ));
    }

    #[test]
    fn afg_tolerances() {
        let set = afg1062();
        let tol = |name| set.find_field(name).and_then(|f| f.comparator.tolerance());
        assert_eq!(tol("frequency_hz"), Some(0.5));
        assert_eq!(tol("voltage_vpp"), Some(0.05));
        assert_eq!(tol("offset_v"), Some(0.01));
        assert_eq!(tol("load"), None);
    }

    #[test]
    fn osa_aliases() {
        assert_eq!(osa_channel("Total"), Some("1+2"));
        assert_eq!(osa_channel("dual"), Some("1&2"));
        assert_eq!(osa_channel("ch2"), Some("2"));
        assert_eq!(osa_channel("3"), None);
    }
}
