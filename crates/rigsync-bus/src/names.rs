//! Property and method names used on the automation bus.

// Subsystem properties
pub const STATUS: &str = "status";
pub const EKOS_STATUS: &str = "ekosStatus";
pub const PARK_STATUS: &str = "parkStatus";
pub const CAMERA: &str = "camera";
pub const FILTER_WHEEL: &str = "filterWheel";
pub const OPTICAL_TRAIN: &str = "opticalTrain";
pub const TARGET_NAME: &str = "targetName";
pub const CURRENT_JOB_NAME: &str = "currentJobName";
pub const CURRENT_JOB_JSON: &str = "currentJobJson";
pub const TELESCOPE_INFO: &str = "telescopeInfo";

// Subsystem methods
pub const START: &str = "start";
pub const STOP: &str = "stop";
pub const ABORT: &str = "abort";
pub const PARK: &str = "park";
pub const UNPARK: &str = "unpark";
pub const SLEW: &str = "slew";
pub const LOAD_SCHEDULER: &str = "loadScheduler";
pub const LOAD_SEQUENCE_QUEUE: &str = "loadSequenceQueue";
pub const CLEAR_SEQUENCE_QUEUE: &str = "clearSequenceQueue";
pub const GET_PENDING_JOB_COUNT: &str = "getPendingJobCount";
pub const GET_ACTIVE_JOB_ID: &str = "getActiveJobID";
pub const GET_JOB_EXPOSURE_DURATION: &str = "getJobExposureDuration";
pub const GET_JOB_EXPOSURE_PROGRESS: &str = "getJobExposureProgress";
pub const GET_JOB_IMAGE_COUNT: &str = "getJobImageCount";
pub const GET_JOB_IMAGE_PROGRESS: &str = "getJobImageProgress";
pub const CAPTURE_AND_SOLVE: &str = "captureAndSolve";
pub const GET_SOLUTION_RESULT: &str = "getSolutionResult";
pub const SET_SOLVER_ACTION: &str = "setSolverAction";
pub const GET_TARGET_COORDS: &str = "getTargetCoords";
pub const SET_TARGET_COORDS: &str = "setTargetCoords";
pub const SET_TARGET_POSITION_ANGLE: &str = "setTargetPositionAngle";
pub const FOCUSER: &str = "focuser";

// Device-property bus (indi subsystem)
pub const GET_DEVICES: &str = "getDevices";
pub const GET_PROPERTIES: &str = "getProperties";
pub const GET_PROPERTY_STATE: &str = "getPropertyState";
pub const GET_NUMBER: &str = "getNumber";
pub const SET_NUMBER: &str = "setNumber";
pub const GET_SWITCH: &str = "getSwitch";
pub const SET_SWITCH: &str = "setSwitch";
pub const GET_TEXT: &str = "getText";
pub const SET_TEXT: &str = "setText";
pub const SEND_PROPERTY: &str = "sendProperty";

/// Solver action: sync the mount to the solution.
pub const SOLVER_ACTION_SYNC: i64 = 1;
/// Solver action: slew to the target after solving.
pub const SOLVER_ACTION_SLEW: i64 = 2;

/// Driver interface bit of rotator devices.
pub const ROTATOR_INTERFACE: i64 = 1 << 12;
