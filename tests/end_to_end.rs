use std::fs;
use std::path::{Path, PathBuf};

use gridmr::config::JobConfig;
use gridmr::mapreducer::{mod_partition, MOD_PARTITION};
use gridmr::{
    ExecMode, Job, MEmitter, MRError, MRParameters, MultiRecord, Operation, Program, REmitter,
    Record, ShuffleGrid,
};

fn program() -> Program {
    Program::new()
        .with_mapper("wc_map", |e: &mut MEmitter, r: Record| {
            for w in r.value.split_whitespace() {
                e.emit(w, "1");
            }
        })
        .with_reducer("wc_reduce", |e: &mut REmitter, vs: MultiRecord<'_>| {
            let n: u64 = vs.filter_map(|v| v.parse::<u64>().ok()).sum();
            e.emit(n.to_string());
        })
        .with_mapper("swap", |e: &mut MEmitter, r: Record| e.emit(r.value, r.key))
        .with_reducer("join", |e: &mut REmitter, vs: MultiRecord<'_>| {
            let mut words: Vec<String> = vs.collect();
            words.sort();
            e.emit(words.join(","));
        })
        .with_mapper("line_len", |e: &mut MEmitter, r: Record| {
            e.emit(r.value.len().to_string(), r.value)
        })
        .with_reducer("count", |e: &mut REmitter, vs: MultiRecord<'_>| {
            e.emit(vs.count().to_string())
        })
}

const TEXTS: [&str; 2] = [
    "a rose is a rose is a rose\nwhat is in a name\n",
    "that which we call a rose\nby any other name would smell as sweet\n",
];

fn inputs(dir: &Path) -> Vec<PathBuf> {
    TEXTS
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let p = dir.join(format!("part_{}.txt", i));
            fs::write(&p, t).unwrap();
            p
        })
        .collect()
}

fn job(inputs: &[PathBuf], params: MRParameters, ops: &[Operation]) -> Job {
    let mut job = Job::new("e2e", params);
    for i in inputs {
        job = job.add_input(i.clone());
    }
    for op in ops {
        job = job.add_operation(op.clone());
    }
    job
}

fn records(grid: &ShuffleGrid) -> Vec<Record> {
    let mut v: Vec<Record> = grid.data().unwrap().map(|r| r.unwrap()).collect();
    v.sort();
    v
}

#[test]
fn word_count_matches_serial_run() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = inputs(dir.path());
    let ops = [Operation::map("wc_map"), Operation::reduce("wc_reduce")];
    let params = MRParameters::new().set_reduce_tasks(2).set_output_splits(1);

    let serial = job(&inputs, params.clone(), &ops).run(&program(), ExecMode::Serial).unwrap();
    let mock = job(&inputs, params, &ops).run(&program(), ExecMode::MockParallel).unwrap();

    // Two reduce tasks, one output split each.
    assert_eq!(mock.sources(), 2);
    assert_eq!(mock.splits(), 1);

    let out = records(&mock);
    assert_eq!(out, records(&serial));
    assert!(out.contains(&Record::new("a", "5")));
    assert!(out.contains(&Record::new("rose", "4")));
    assert!(out.contains(&Record::new("sweet", "1")));

    // Every key is reduced by exactly one task.
    let mut keys: Vec<&str> = out.iter().map(|r| r.key.as_str()).collect();
    let n = keys.len();
    keys.dedup();
    assert_eq!(keys.len(), n);
}

#[test]
fn reducemap_pipeline_in_every_mode() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = inputs(dir.path());
    // Count words, flip to (count, word) and gather the words of each count.
    let ops = [
        Operation::map("wc_map"),
        Operation::reduce_map("wc_reduce", "swap"),
        Operation::reduce("join"),
    ];
    let params = MRParameters::new().set_reduce_tasks(3).set_threads(3);

    let results: Vec<Vec<Record>> = [ExecMode::Serial, ExecMode::MockParallel, ExecMode::Parallel]
        .iter()
        .map(|&mode| records(&job(&inputs, params.clone(), &ops).run(&program(), mode).unwrap()))
        .collect();

    assert_eq!(results[0], results[1]);
    assert_eq!(results[1], results[2]);
    assert!(results[0].contains(&Record::new("4", "rose")));
    assert!(results[0].contains(&Record::new("5", "a")));
    assert!(results[0].contains(&Record::new("2", "name")));
}

fn count_files(dir: &Path, ext: &str) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| {
            let p = e.unwrap().path();
            if p.is_dir() {
                count_files(&p, ext)
            } else {
                (p.extension().and_then(|e| e.to_str()) == Some(ext)) as usize
            }
        })
        .sum()
}

#[test]
fn fused_reducemap_matches_separate_phases() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = inputs(dir.path());
    let scratch = tempfile::tempdir().unwrap();
    let params = MRParameters::new()
        .set_reduce_tasks(3)
        .set_scratch_dir(scratch.path())
        .set_keep_temp_files(true);

    let fused = [Operation::map("wc_map"), Operation::reduce_map("wc_reduce", "swap")];
    let separate = [
        Operation::map("wc_map"),
        Operation::reduce("wc_reduce"),
        Operation::map("swap"),
    ];

    let a = job(&inputs, params.clone(), &fused)
        .run(&program(), ExecMode::MockParallel)
        .unwrap();
    let fused_files = count_files(scratch.path(), "wlg");
    let b = job(&inputs, params, &separate)
        .run(&program(), ExecMode::MockParallel)
        .unwrap();

    // The separate run stored its reduce output as an extra WriteLog grid.
    assert!(fused_files > 0);
    assert!(count_files(scratch.path(), "wlg") > 2 * fused_files);

    let fused = records(&a);
    assert_eq!(fused, records(&b));
    assert!(fused.contains(&Record::new("4", "rose")));
    assert!(fused.contains(&Record::new("1", "sweet")));
}

#[test]
fn custom_partition_routes_keys() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = inputs(dir.path());
    let ops = [
        Operation::map("line_len").with_partition(MOD_PARTITION),
        Operation::reduce("count").with_partition(MOD_PARTITION),
    ];
    let params = MRParameters::new().set_reduce_tasks(2).set_output_splits(3);
    let out = job(&inputs, params, &ops).run(&program(), ExecMode::MockParallel).unwrap();

    assert_eq!(out.splits(), 3);
    for source in 0..out.sources() {
        for split in 0..3 {
            for r in out.bucket(source, split).unwrap().read().unwrap() {
                let r = r.unwrap();
                assert_eq!(mod_partition(&r.key, 3), split);
                // A line length lands in reduce task (length mod 2).
                assert_eq!(r.key.parse::<usize>().unwrap() % 2, source);
            }
        }
    }
    assert_eq!(records(&out).len(), 4);
}

#[test]
fn job_from_description() {
    let dir = tempfile::tempdir().unwrap();
    inputs(dir.path());
    let out_dir = dir.path().join("out");
    let description = r#"
id = "wc"
mode = "parallel"
inputs = ["part_0.txt", "part_1.txt"]

[parameters]
reduce_tasks = 2
output_dir = "out"
sort_chunk_size = 3

[[phase]]
kind = "map"
mapper = "wc_map"

[[phase]]
kind = "reduce"
reducer = "wc_reduce"
"#;
    let path = dir.path().join("wc.toml");
    fs::write(&path, description).unwrap();

    let config = JobConfig::from_file(&path).unwrap();
    let out = config.to_job().unwrap().run(&program(), config.mode).unwrap();

    let mut lines: Vec<String> = out
        .outurls()
        .into_iter()
        .flat_map(|(_, _, p)| {
            assert!(p.starts_with(&out_dir));
            fs::read_to_string(p)
                .unwrap()
                .lines()
                .map(String::from)
                .collect::<Vec<_>>()
        })
        .collect();
    lines.sort();
    assert!(lines.contains(&String::from("rose 4")));
    assert!(lines.contains(&String::from("name 2")));
}

#[test]
fn failures_are_reported_with_coordinates() {
    let dir = tempfile::tempdir().unwrap();
    let mut inputs = inputs(dir.path());
    inputs.insert(0, dir.path().join("absent.txt"));
    let ops = [Operation::map("wc_map"), Operation::reduce("wc_reduce")];

    match job(&inputs, MRParameters::new(), &ops).run(&program(), ExecMode::MockParallel) {
        Err(MRError::TaskFailed { phase: 0, task: 0, .. }) => (),
        other => panic!("expected task failure, got {:?}", other.map(|g| g.id().to_string())),
    }

    let unbound = [Operation::map("wc_map"), Operation::reduce("nope")];
    let err = job(&inputs, MRParameters::new(), &unbound)
        .run(&program(), ExecMode::Serial)
        .unwrap_err();
    assert!(err.is_config());
}
