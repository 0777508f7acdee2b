//! A static DAG of named tasks, built once after registration and
//! reused every step (spec.md §4.6).

mod task;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io::Write;
use std::path::Path;

use petgraph::graphmap::DiGraphMap;

use crate::channels::StreamToken;
use crate::error::CoreError;

pub use task::{Priority, Task, TaskFn};

/// The compiled, ready-to-execute plan `compile()` produces: one
/// deterministic topological order of task ids.
pub struct CompiledPlan {
    order: Vec<usize>,
}

/// A DAG of named tasks with priorities, built once after registration
/// and reused every step (spec.md §4.6).
#[derive(Default)]
pub struct TaskScheduler {
    tasks: Vec<Task>,
    name_to_id: HashMap<String, usize>,
    edges: Vec<(usize, usize)>,
    plan: Option<CompiledPlan>,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(
        &mut self,
        name: impl Into<String>,
        priority: Priority,
        stride: u32,
        callback: task::TaskFn,
    ) -> usize {
        let name = name.into();
        let id = self.tasks.len();
        self.name_to_id.insert(name.clone(), id);
        self.tasks.push(Task {
            id,
            name,
            priority,
            stride: stride.max(1),
            callback,
        });
        self.plan = None;
        id
    }

    fn id_of(&self, name: &str) -> Result<usize, CoreError> {
        self.name_to_id.get(name).copied().ok_or_else(|| {
            CoreError::Configuration(crate::error::ConfigurationError::UnknownComponent(name.to_string()))
        })
    }

    /// `X,Y` must complete before `a` runs; `a` must complete before
    /// `B,C` run (spec.md §4.6).
    pub fn add_dependency(&mut self, a: &str, before: &[&str], after: &[&str]) -> Result<(), CoreError> {
        let a_id = self.id_of(a)?;
        for &b in before {
            let b_id = self.id_of(b)?;
            self.edges.push((a_id, b_id));
        }
        for &x in after {
            let x_id = self.id_of(x)?;
            self.edges.push((x_id, a_id));
        }
        self.plan = None;
        Ok(())
    }

    fn build_graph(&self) -> DiGraphMap<usize, ()> {
        let mut g = DiGraphMap::new();
        for task in &self.tasks {
            g.add_node(task.id);
        }
        for &(from, to) in &self.edges {
            g.add_edge(from, to, ());
        }
        g
    }

    /// Topologically order tasks, breaking ties deterministically by
    /// priority then by stable task-id order (spec.md §9 "task graph
    /// determinism"). Fails iff the graph is not acyclic.
    pub fn compile(&mut self) -> Result<(), CoreError> {
        let graph = self.build_graph();
        let mut indegree: HashMap<usize, usize> = self.tasks.iter().map(|t| (t.id, 0)).collect();
        for (_, to, _) in graph.all_edges() {
            *indegree.get_mut(&to).unwrap() += 1;
        }

        let mut ready: BinaryHeap<(Priority, Reverse<usize>)> = BinaryHeap::new();
        for task in &self.tasks {
            if indegree[&task.id] == 0 {
                ready.push((task.priority, Reverse(task.id)));
            }
        }

        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some((_, Reverse(id))) = ready.pop() {
            order.push(id);
            for succ in graph.neighbors(id) {
                let d = indegree.get_mut(&succ).unwrap();
                *d -= 1;
                if *d == 0 {
                    let succ_task = &self.tasks[succ];
                    ready.push((succ_task.priority, Reverse(succ)));
                }
            }
        }

        if order.len() != self.tasks.len() {
            return Err(CoreError::InvariantViolation {
                task: "TaskScheduler::compile".to_string(),
                detail: "task dependency graph contains a cycle".to_string(),
            });
        }

        self.plan = Some(CompiledPlan { order });
        Ok(())
    }

    /// Execute tasks in dependency order for the given step, skipping
    /// any task whose stride does not fire this step. A task failure is
    /// fatal to the step (spec.md §4.6, §7): the error is returned to
    /// the caller, which is expected to log and abort.
    pub fn run(&mut self, step: u64) -> Result<usize, CoreError> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| CoreError::InvariantViolation {
                task: "TaskScheduler::run".to_string(),
                detail: "compile() must succeed before run()".to_string(),
            })?;
        let mut ran = 0;
        for &id in &plan.order {
            let task = &mut self.tasks[id];
            if !task.runs_on_step(step) {
                continue;
            }
            (task.callback)(StreamToken::default()).map_err(|e| {
                log::error!(
                    "task '{}' failed fatally on step {}: {}",
                    task.name,
                    step,
                    e
                );
                e
            })?;
            ran += 1;
        }
        Ok(ran)
    }

    /// Run one task unconditionally, ignoring its stride. Used for
    /// boot-time initialisation (spec.md §4.7 "forceExec the initial
    /// object halo setup").
    pub fn force_exec(&mut self, name: &str) -> Result<(), CoreError> {
        let id = self.id_of(name)?;
        (self.tasks[id].callback)(StreamToken::default())
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_compiled(&self) -> bool {
        self.plan.is_some()
    }

    pub fn task_name(&self, id: usize) -> &str {
        &self.tasks[id].name
    }

    pub fn should_run(&self, id: usize, step: u64) -> bool {
        self.tasks[id].runs_on_step(step)
    }

    /// The order `compile()` produced, as task ids. Lets a caller drive
    /// execution by name rather than through the stored callback (used
    /// by the [`crate::simulation`] driver, which dispatches every task
    /// through one `match` over registered component kinds instead of a
    /// closure per task).
    pub fn compiled_order(&self) -> Option<&[usize]> {
        self.plan.as_ref().map(|p| p.order.as_slice())
    }

    /// Export the current graph for inspection (spec.md §6
    /// `saveDependencyGraph`).
    pub fn save_dependency_graph_graphml(&self, path: &Path) -> Result<(), CoreError> {
        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str("<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">\n");
        out.push_str("  <key id=\"name\" for=\"node\" attr.name=\"name\" attr.type=\"string\"/>\n");
        out.push_str("  <graph id=\"tasks\" edgedefault=\"directed\">\n");
        for task in &self.tasks {
            out.push_str(&format!(
                "    <node id=\"n{}\"><data key=\"name\">{}</data></node>\n",
                task.id, task.name
            ));
        }
        for &(from, to) in &self.edges {
            out.push_str(&format!("    <edge source=\"n{from}\" target=\"n{to}\"/>\n"));
        }
        out.push_str("  </graph>\n</graphml>\n");

        let mut file = std::fs::File::create(path)
            .map_err(|e| CoreError::Exchange(format!("failed to create {:?}: {e}", path)))?;
        file.write_all(out.as_bytes())
            .map_err(|e| CoreError::Exchange(format!("failed to write {:?}: {e}", path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn push_task(order: Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> task::TaskFn {
        Box::new(move |_stream| {
            order.lock().unwrap().push(name);
            Ok(())
        })
    }

    #[test]
    fn compile_succeeds_on_acyclic_graph_and_orders_by_dependency() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut sched = TaskScheduler::new();
        sched.add_task("build_cells", Priority::Normal, 1, push_task(order.clone(), "build_cells"));
        sched.add_task("clear_forces", Priority::High, 1, push_task(order.clone(), "clear_forces"));
        sched.add_task("integrate", Priority::Normal, 1, push_task(order.clone(), "integrate"));
        sched
            .add_dependency("integrate", &[], &["build_cells", "clear_forces"])
            .unwrap();
        sched.compile().unwrap();
        assert_eq!(sched.run(0).unwrap(), 3);
        let ran = order.lock().unwrap().clone();
        assert_eq!(ran.last(), Some(&"integrate"));
        assert_eq!(ran[0], "clear_forces");
    }

    #[test]
    fn cycle_is_rejected() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut sched = TaskScheduler::new();
        sched.add_task("a", Priority::Normal, 1, push_task(order.clone(), "a"));
        sched.add_task("b", Priority::Normal, 1, push_task(order.clone(), "b"));
        sched.add_dependency("a", &["b"], &[]).unwrap();
        sched.add_dependency("b", &["a"], &[]).unwrap();
        assert!(sched.compile().is_err());
    }

    #[test]
    fn stride_skips_non_firing_steps() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut sched = TaskScheduler::new();
        sched.add_task("checkpoint", Priority::Low, 10, push_task(order.clone(), "checkpoint"));
        sched.compile().unwrap();
        assert_eq!(sched.run(3).unwrap(), 0);
        assert_eq!(sched.run(10).unwrap(), 1);
    }

    #[test]
    fn compile_is_deterministic_across_runs() {
        let mut orders = Vec::new();
        for _ in 0..3 {
            let order = Arc::new(Mutex::new(Vec::new()));
            let mut sched = TaskScheduler::new();
            sched.add_task("a", Priority::Normal, 1, push_task(order.clone(), "a"));
            sched.add_task("b", Priority::Normal, 1, push_task(order.clone(), "b"));
            sched.add_task("c", Priority::Normal, 1, push_task(order.clone(), "c"));
            sched.compile().unwrap();
            sched.run(0).unwrap();
            orders.push(order.lock().unwrap().clone());
        }
        assert!(orders.windows(2).all(|w| w[0] == w[1]));
    }
}
