/// Linear temperature drift toward the current target, ticked once per
/// `read_line` call so a test waiting on `M109`/`M190` sees gradual
/// progress rather than an instant jump.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TemperatureModel {
    pub tool_actual: f32,
    pub tool_target: f32,
    pub bed_actual: f32,
    pub bed_target: f32,
}

const DRIFT_PER_TICK: f32 = 5.0;

impl TemperatureModel {
    pub fn new() -> Self {
        Self {
            tool_actual: 20.0,
            tool_target: 0.0,
            bed_actual: 20.0,
            bed_target: 0.0,
        }
    }

    pub fn tick(&mut self) {
        Self::step(&mut self.tool_actual, self.tool_target);
        Self::step(&mut self.bed_actual, self.bed_target);
    }

    fn step(actual: &mut f32, target: f32) {
        if (*actual - target).abs() <= DRIFT_PER_TICK {
            *actual = target;
        } else if *actual < target {
            *actual += DRIFT_PER_TICK;
        } else {
            *actual -= DRIFT_PER_TICK;
        }
    }

    pub fn status_line(&self) -> String {
        format!(
            "ok T:{:.1} /{:.1} B:{:.1} /{:.1}",
            self.tool_actual, self.tool_target, self.bed_actual, self.bed_target
        )
    }
}
