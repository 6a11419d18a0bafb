//! Default parameter tree
//!
//! Builds every parameter family with its type, default and help text.
//! Dynamic families (per stage, per tool, per library, per metric...) carry a
//! `default` template node that is cloned when a new name is first written.

use super::node::{Leaf, Node, TEMPLATE_KEY};
use super::value::{LeafType, ScalarKind, Value};
use std::collections::BTreeMap;

const STR: LeafType = LeafType::scalar(ScalarKind::Str);
const INT: LeafType = LeafType::scalar(ScalarKind::Int);
const FLOAT: LeafType = LeafType::scalar(ScalarKind::Float);
const BOOL: LeafType = LeafType::scalar(ScalarKind::Bool);
const DIR: LeafType = LeafType::scalar(ScalarKind::Dir);
const STR_LIST: LeafType = LeafType::list_of(ScalarKind::Str);
const FILE_LIST: LeafType = LeafType::list_of(ScalarKind::File);
const DIR_LIST: LeafType = LeafType::list_of(ScalarKind::Dir);

/// Metric names and kinds tracked per stage instance
pub const METRICS: &[(&str, LeafType, &str)] = &[
    ("registers", INT, "Total number of registers"),
    ("cells", INT, "Total number of instances"),
    ("rambits", INT, "Total number of RAM bits"),
    ("xtors", INT, "Total number of transistors"),
    ("nets", INT, "Total number of nets"),
    ("pins", INT, "Total number of pins"),
    ("vias", INT, "Total number of vias"),
    ("wirelength", FLOAT, "Total wirelength"),
    ("overflow", INT, "Routing overflow"),
    ("area_cells", FLOAT, "Cell area"),
    ("area_total", FLOAT, "Total area"),
    ("area_density", FLOAT, "Cell density"),
    ("power_total", FLOAT, "Total power"),
    ("power_leakage", FLOAT, "Leakage power"),
    ("hold_slack", FLOAT, "Worst hold slack"),
    ("hold_tns", FLOAT, "Total negative hold slack"),
    ("setup_slack", FLOAT, "Worst setup slack"),
    ("setup_tns", FLOAT, "Total negative setup slack"),
    ("drv", INT, "Design rule violations"),
    ("warnings", INT, "Total warnings"),
    ("errors", INT, "Total errors"),
    ("runtime", FLOAT, "Wall-clock runtime in seconds"),
    ("memory", FLOAT, "Peak memory in bytes"),
];

struct Param {
    leaf: Leaf,
}

/// Start a parameter; the switch is derived from the fixed words of
/// `param_help`
fn param(kind: LeafType, param_help: &str, short_help: &str) -> Param {
    let file = kind.kind == ScalarKind::File;
    Param {
        leaf: Leaf {
            switch: switch_for(param_help),
            kind,
            requirement: "optional".to_string(),
            defvalue: kind.empty_value(),
            value: kind.empty_value(),
            short_help: short_help.to_string(),
            param_help: param_help.to_string(),
            example: Vec::new(),
            help: None,
            copy: file.then_some(false),
            hash: file.then(Vec::new),
        },
    }
}

impl Param {
    fn defvalue(mut self, value: impl Into<Value>) -> Self {
        let value = self
            .leaf
            .kind
            .coerce(value.into())
            .unwrap_or_else(|_| self.leaf.kind.empty_value());
        self.leaf.defvalue = value.clone();
        self.leaf.value = value;
        self
    }

    fn required(mut self, requirement: &str) -> Self {
        self.leaf.requirement = requirement.to_string();
        self
    }

    fn example(mut self, cli: &str, api: &str) -> Self {
        self.leaf.example = vec![format!("cli: {}", cli), format!("api: {}", api)];
        self
    }

    fn help(mut self, text: &str) -> Self {
        self.leaf.help = Some(text.to_string());
        self
    }

    fn copy(mut self, flag: bool) -> Self {
        self.leaf.copy = Some(flag);
        self
    }

    fn build(self) -> Node {
        Node::leaf(self.leaf)
    }
}

fn switch_for(param_help: &str) -> String {
    let words: Vec<&str> = param_help
        .split_whitespace()
        .take_while(|w| !w.starts_with('<'))
        .filter(|w| !w.ends_with("var"))
        .collect();
    format!("-{}", words.join("_"))
}

fn branch(entries: Vec<(&str, Node)>) -> Node {
    Node::Branch(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<BTreeMap<_, _>>(),
    )
}

/// Branch whose only child is the `default` template
fn template(node: Node) -> Node {
    branch(vec![(TEMPLATE_KEY, node)])
}

/// The full default tree
pub fn schema_tree() -> Node {
    let mut root = BTreeMap::new();
    for family in [
        design_params(),
        option_params(),
        flowgraph_params(),
        eda_params(),
        arg_params(),
        metric_params(),
        record_params(),
        status_params(),
        fpga_params(),
        remote_params(),
        library_params(),
    ] {
        if let Node::Branch(map) = family {
            root.extend(map);
        }
    }
    Node::Branch(root)
}

fn design_params() -> Node {
    branch(vec![
        (
            "design",
            param(STR, "design <str>", "Design top module name")
                .required("all")
                .example("-design hello_world", "schema.set(\"design\", \"hello_world\")")
                .help("Name of the top level module. Used to name job directories and output manifests.")
                .build(),
        ),
        (
            "source",
            param(FILE_LIST, "source <file>", "Design source files")
                .copy(true)
                .example("-source hello_world.v", "schema.add(\"source\", \"hello_world.v\")")
                .help("List of source files. Source stages collect these into their inputs directory.")
                .build(),
        ),
        (
            "constraint",
            param(FILE_LIST, "constraint <file>", "Design constraint files")
                .copy(true)
                .build(),
        ),
        (
            "param",
            template(param(STR, "param namevar <str>", "Design parameter override").build()),
        ),
        ("define", param(STR_LIST, "define <str>", "Verilog preprocessor symbols").build()),
        ("ydir", param(DIR_LIST, "ydir <dir>", "Verilog module search paths").build()),
        ("idir", param(DIR_LIST, "idir <dir>", "Verilog include search paths").build()),
        ("vlib", param(FILE_LIST, "vlib <file>", "Verilog library files").build()),
    ])
}

fn option_params() -> Node {
    branch(vec![
        (
            "mode",
            param(STR, "mode <str>", "Compilation mode")
                .defvalue("asic")
                .required("all")
                .help("Either 'asic' or 'fpga'. In fpga mode the target platform token names the part.")
                .build(),
        ),
        (
            "target",
            param(STR, "target <str>", "Compilation target")
                .example("-target freepdk45_asicflow", "schema.set(\"target\", \"freepdk45_asicflow\")")
                .help("Platform and flow names joined by '_'. Loading the target configures the flow graph.")
                .build(),
        ),
        ("cfg", param(FILE_LIST, "cfg <file>", "Configuration manifests").build()),
        (
            "env",
            template(param(STR, "env varvar <str>", "Environment variables passed to tools").build()),
        ),
        (
            "scpath",
            param(DIR_LIST, "scpath <dir>", "Search path for relative file parameters").build(),
        ),
        (
            "hashmode",
            param(STR, "hashmode <str>", "File hashing mode")
                .defvalue("OFF")
                .help("OFF disables hashing. ALL hashes every hashable file parameter before a run.")
                .build(),
        ),
        (
            "quiet",
            param(BOOL, "quiet <bool>", "Send tool output to log files only")
                .defvalue(false)
                .build(),
        ),
        (
            "loglevel",
            param(STR, "loglevel <str>", "Logging level").defvalue("WARNING").build(),
        ),
        (
            "build_dir",
            param(DIR, "build_dir <dir>", "Build directory")
                .defvalue("build")
                .help("Root of all job directories: <build_dir>/<design>/<jobname><jobid>.")
                .build(),
        ),
        ("jobname", param(STR, "jobname <str>", "Job name prefix").defvalue("job").build()),
        ("jobid", param(INT, "jobid <int>", "Job index").defvalue(0).build()),
        (
            "jobincr",
            param(BOOL, "jobincr <bool>", "Autoincrement the job index")
                .defvalue(true)
                .build(),
        ),
        (
            "steplist",
            param(STR_LIST, "steplist <str>", "Stages to run")
                .help("Restricts a run to these stages. Empty runs the whole flow graph.")
                .build(),
        ),
        ("msgevent", param(STR_LIST, "msgevent <str>", "Stages that send messages").build()),
        (
            "bkpt",
            param(STR_LIST, "bkpt <str>", "Stages that tee tool output to the console").build(),
        ),
        (
            "copyall",
            param(BOOL, "copyall <bool>", "Collect every file parameter")
                .defvalue(false)
                .build(),
        ),
        ("relax", param(BOOL, "relax <bool>", "Relax linting").defvalue(false).build()),
        (
            "clean",
            param(BOOL, "clean <bool>", "Remove intermediate files").defvalue(false).build(),
        ),
    ])
}

fn flowgraph_params() -> Node {
    let stage = branch(vec![
        (
            "input",
            param(STR_LIST, "flowgraph stepvar input <str>", "Flowgraph stage inputs")
                .example(
                    "-flowgraph_input 'cts place'",
                    "schema.add(keypath![\"flowgraph\", \"cts\", \"input\"], \"place\")",
                )
                .help("Stages whose outputs feed this stage. A stage with no inputs is a source stage.")
                .build(),
        ),
        (
            "nproc",
            param(INT, "flowgraph stepvar nproc <int>", "Flowgraph stage parallelism")
                .defvalue(1)
                .build(),
        ),
        (
            "tool",
            param(STR, "flowgraph stepvar tool <str>", "Flowgraph stage tool").build(),
        ),
        (
            "showtool",
            param(STR, "flowgraph stepvar showtool <str>", "Flowgraph stage viewer").build(),
        ),
        (
            "mergeop",
            param(STR, "flowgraph stepvar mergeop <str>", "Flowgraph input merge operation")
                .defvalue("min")
                .build(),
        ),
        (
            "weight",
            template(
                param(FLOAT, "flowgraph stepvar weight metricvar <float>", "Flowgraph metric weight")
                    .help("Weight applied to a metric when scoring instances of this stage. Unweighted metrics count 1.0.")
                    .build(),
            ),
        ),
    ]);
    branch(vec![("flowgraph", template(stage))])
}

fn eda_params() -> Node {
    let config = branch(vec![
        ("exe", param(STR, "eda toolvar stepvar indexvar exe <str>", "Tool executable").build()),
        ("vendor", param(STR, "eda toolvar stepvar indexvar vendor <str>", "Tool vendor").build()),
        (
            "version",
            param(STR, "eda toolvar stepvar indexvar version <str>", "Tool version").build(),
        ),
        (
            "option",
            template(
                param(STR_LIST, "eda toolvar stepvar indexvar option optionvar <str>", "Tool options")
                    .help("Options appended to the command line. The 'cmdline' option is used for direct tool arguments.")
                    .build(),
            ),
        ),
        (
            "refdir",
            param(DIR_LIST, "eda toolvar stepvar indexvar refdir <dir>", "Tool reference script directory")
                .build(),
        ),
        (
            "script",
            param(FILE_LIST, "eda toolvar stepvar indexvar script <file>", "Tool entry scripts").build(),
        ),
        (
            "prescript",
            param(FILE_LIST, "eda toolvar stepvar indexvar prescript <file>", "Tool pre-step scripts")
                .build(),
        ),
        (
            "postscript",
            param(FILE_LIST, "eda toolvar stepvar indexvar postscript <file>", "Tool post-step scripts")
                .build(),
        ),
        (
            "copy",
            param(BOOL, "eda toolvar stepvar indexvar copy <bool>", "Copy reference scripts")
                .defvalue(false)
                .build(),
        ),
        ("format", param(STR, "eda toolvar stepvar indexvar format <str>", "Tool manifest format").build()),
        ("threads", param(INT, "eda toolvar stepvar indexvar threads <int>", "Tool thread count").build()),
        ("woff", param(STR_LIST, "eda toolvar stepvar indexvar woff <str>", "Tool warnings to ignore").build()),
    ]);
    branch(vec![("eda", template(template(template(config))))])
}

fn arg_params() -> Node {
    branch(vec![(
        "arg",
        branch(vec![
            ("step", param(STR, "arg step <str>", "Current stage").build()),
            ("index", param(INT, "arg index <int>", "Current stage index").build()),
        ]),
    )])
}

fn metric_params() -> Node {
    let names: Vec<(&str, Node)> = METRICS
        .iter()
        .map(|(name, kind, short)| {
            let help = format!("metric stepvar indexvar groupvar {} <{}>", name, kind.kind.as_str());
            (*name, param(*kind, &help, short).build())
        })
        .collect();
    branch(vec![("metric", template(template(template(branch(names)))))])
}

fn record_params() -> Node {
    let fields = [
        ("author", "Author name"),
        ("userid", "User id"),
        ("signature", "Author signature"),
        ("org", "Author organization"),
        ("location", "Run location"),
        ("date", "Run start date"),
        ("time", "Run start time"),
    ];
    let mut entries: Vec<(&str, Node)> = fields
        .iter()
        .map(|(name, short)| {
            let help = format!("record stepvar indexvar {} <str>", name);
            (*name, param(STR, &help, short).build())
        })
        .collect();
    entries.push((
        "input",
        param(FILE_LIST, "record stepvar indexvar input <file>", "Stage input files").build(),
    ));
    branch(vec![("record", template(template(branch(entries))))])
}

fn status_params() -> Node {
    branch(vec![(
        "status",
        template(branch(vec![
            (
                "active",
                param(BOOL, "status stepvar active <bool>", "Stage is running").build(),
            ),
            (
                "error",
                param(BOOL, "status stepvar error <bool>", "Stage failed").build(),
            ),
        ])),
    )])
}

fn fpga_params() -> Node {
    branch(vec![(
        "fpga",
        branch(vec![
            ("arch", param(FILE_LIST, "fpga arch <file>", "FPGA architecture files").build()),
            ("vendor", param(STR, "fpga vendor <str>", "FPGA vendor").build()),
            (
                "partname",
                param(STR, "fpga partname <str>", "FPGA part name")
                    .help("Set from the platform token of the target when mode is 'fpga'.")
                    .build(),
            ),
        ]),
    )])
}

fn remote_params() -> Node {
    branch(vec![(
        "remote",
        branch(vec![
            (
                "addr",
                param(STR, "remote addr <str>", "Remote server address")
                    .help("When set, the run is handed to the remote dispatcher instead of executing locally.")
                    .build(),
            ),
            ("port", param(INT, "remote port <int>", "Remote server port").defvalue(443).build()),
            ("hash", param(STR, "remote hash <str>", "Remote job identifier").build()),
            ("user", param(STR, "remote user <str>", "Remote user name").build()),
            (
                "key",
                param(STR, "remote key <str>", "Remote job decryption key")
                    .help("Removed from the configuration before any manifest is written.")
                    .build(),
            ),
            ("start", param(STR, "remote start <str>", "First stage to run remotely").build()),
            ("stop", param(STR, "remote stop <str>", "Last stage to run remotely").build()),
            ("hosts", param(INT, "remote hosts <int>", "Remote host count").build()),
            ("ram", param(INT, "remote ram <int>", "Remote host memory in GB").build()),
            ("threads", param(INT, "remote threads <int>", "Remote host thread count").build()),
        ]),
    )])
}

fn library_params() -> Node {
    let lib = branch(vec![
        ("type", param(STR, "library libvar type <str>", "Library type").build()),
        ("rev", param(STR, "library libvar rev <str>", "Library release version").build()),
        ("lef", param(FILE_LIST, "library libvar lef <file>", "Library LEF files").build()),
        ("gds", param(FILE_LIST, "library libvar gds <file>", "Library GDS files").build()),
        (
            "netlist",
            param(FILE_LIST, "library libvar netlist <file>", "Library netlist files").build(),
        ),
        (
            "cells",
            template(param(STR_LIST, "library libvar cells groupvar <str>", "Library cell lists").build()),
        ),
    ]);
    branch(vec![("library", template(lib))])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_derivation() {
        assert_eq!(switch_for("flowgraph stepvar nproc <int>"), "-flowgraph_nproc");
        assert_eq!(switch_for("eda toolvar stepvar indexvar exe <str>"), "-eda_exe");
        assert_eq!(switch_for("design <str>"), "-design");
    }

    #[test]
    fn test_dynamic_families_have_templates() {
        let tree = schema_tree();
        for family in ["flowgraph", "eda", "metric", "record", "status", "library", "env"] {
            let node = tree.lookup(&[family.to_string()]).unwrap();
            assert!(
                node.children().unwrap().contains_key(TEMPLATE_KEY),
                "{} has no template",
                family
            );
        }
    }

    #[test]
    fn test_file_leaves_are_copyable_and_hashable() {
        let tree = schema_tree();
        let source = tree.lookup(&["source".to_string()]).unwrap().as_leaf().unwrap();
        assert_eq!(source.copy, Some(true));
        assert_eq!(source.hash, Some(vec![]));

        let design = tree.lookup(&["design".to_string()]).unwrap().as_leaf().unwrap();
        assert_eq!(design.copy, None);
        assert_eq!(design.requirement, "all");
    }

    #[test]
    fn test_defaults_populate_values() {
        let tree = schema_tree();
        let path: Vec<String> = ["flowgraph", "default", "nproc"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let nproc = tree.lookup(&path).unwrap().as_leaf().unwrap();
        assert_eq!(nproc.value, Value::Int(1));
    }
}
