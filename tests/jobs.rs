mod common;

use std::time::Duration;

use common::{MockTransport, client, light_curve_reply};
use serde_json::json;
use swift_grb::{
    BinMethod, Error, JobHandle, JobKind, JobState, LightCurveOptions, Objects, OutputOptions,
    RebinRequest, SpectrumOptions, TimesliceRequest,
};

fn status(code: i64, text: &str) -> serde_json::Value {
    json!({"OK": 1, "statusCode": code, "statusText": text})
}

fn returning() -> OutputOptions {
    OutputOptions {
        return_data: true,
        save_data: false,
        ..Default::default()
    }
}

#[test]
fn rebin_submit_poll_fetch() {
    let mut result = light_curve_reply(12.0);
    result["Binning"] = json!("Time");
    let c = client(MockTransport::new([
        json!({"OK": 1, "JobID": "a1b2c3"}),
        status(1, "Queued"),
        status(2, "Running"),
        status(3, "Complete"),
        result,
    ]));

    let request = RebinRequest {
        bin_method: BinMethod::Time { bin_time: 1000.0 },
        min_time: Some(0.0),
        max_time: Some(1e5),
        ..Default::default()
    };
    let job = c
        .rebin_light_curve(&Objects::name("GRB 060729"), &request)
        .unwrap();
    assert_eq!(job.id(), "a1b2c3");
    assert_eq!(job.kind(), JobKind::Rebin);

    assert_eq!(c.check_rebin_status(&job).unwrap().state(), JobState::Queued);
    let done = c.wait_for_job(&job, Duration::ZERO, None).unwrap();
    assert_eq!(done.state(), JobState::Complete);

    let lc = c
        .get_rebinned_light_curve(&job, &LightCurveOptions {
            output: returning(),
            ..Default::default()
        })
        .unwrap()
        .unwrap();
    assert_eq!(lc.binning, "Time");

    let calls = c.transport().calls.borrow();
    assert_eq!(calls[0]["api_name"], "rebinLightCurve");
    assert_eq!(calls[0]["binMeth"], "time");
    assert_eq!(calls[0]["binTime"], 1000.0);
    assert_eq!(calls[1]["api_name"], "checkJobStatus");
    assert_eq!(calls[1]["JobID"], "a1b2c3");
    assert_eq!(calls[4]["api_name"], "getRebinnedLightCurve");
}

#[test]
fn rebin_takes_one_object() {
    let c = client(MockTransport::new([]));
    let err = c
        .rebin_light_curve(&Objects::names(["GRB 060729"]), &RebinRequest::default())
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));

    let bad = RebinRequest {
        min_time: Some(10.0),
        max_time: Some(5.0),
        ..Default::default()
    };
    assert!(c.rebin_light_curve(&Objects::name("GRB 060729"), &bad).is_err());
    assert_eq!(c.transport().call_count(), 0);
}

#[test]
fn fetching_an_unfinished_job_fails() {
    let c = client(MockTransport::new([status(2, "Running")]));
    let job = JobHandle::new(JobKind::Timeslice, "t-99");
    let err = c
        .get_timesliced_spectra(&job, &SpectrumOptions {
            output: returning(),
            ..Default::default()
        })
        .unwrap_err();
    match err {
        Error::JobNotComplete { job, code, .. } => {
            assert_eq!(job, "t-99");
            assert_eq!(code, 2);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(c.transport().calls.borrow().len(), 1);
}

#[test]
fn job_kinds_are_not_interchangeable() {
    let c = client(MockTransport::new([]));
    let job = JobHandle::new(JobKind::Rebin, "a1b2c3");
    assert!(matches!(
        c.get_timesliced_spectra(&job, &SpectrumOptions::default()),
        Err(Error::InvalidRequest(_))
    ));
    assert!(matches!(c.cancel_timeslice(&job), Err(Error::InvalidRequest(_))));
    assert_eq!(c.transport().call_count(), 0);
}

#[test]
fn cancelling_a_completed_job_returns_false() {
    let c = client(MockTransport::new([
        json!({"OK": 1}),
        json!({"OK": 0, "ERROR": "Job has already completed"}),
        status(3, "Complete"),
    ]));
    let job = JobHandle::new(JobKind::Timeslice, "t-1");
    assert!(c.cancel_timeslice(&job).unwrap());
    assert!(!c.cancel_timeslice(&job).unwrap());
    let calls = c.transport().calls.borrow();
    assert_eq!(calls[0]["api_name"], "cancelJob");
    assert_eq!(calls[0]["jobType"], "timeslice");
    assert_eq!(calls[2]["api_name"], "checkJobStatus");
}

#[test]
fn cancel_refusals_for_live_or_unknown_jobs_are_errors() {
    let c = client(MockTransport::new([
        json!({"OK": 0, "ERROR": "Server busy"}),
        status(2, "Running"),
        json!({"OK": 0, "ERROR": "No such job"}),
        json!({"OK": 0, "ERROR": "No such job"}),
    ]));
    let job = JobHandle::new(JobKind::Rebin, "r-1");
    match c.cancel_rebin(&job).unwrap_err() {
        Error::Api { message, .. } => assert_eq!(message, "Server busy"),
        other => panic!("unexpected {other:?}"),
    }
    let unknown = JobHandle::new(JobKind::Rebin, "nope");
    assert!(matches!(c.cancel_rebin(&unknown), Err(Error::Api { .. })));
    assert_eq!(c.transport().call_count(), 4);
}

#[test]
fn failed_jobs_end_the_wait() {
    let c = client(MockTransport::new([status(1, "Queued"), status(-1, "Cancelled")]));
    let job = JobHandle::new(JobKind::Rebin, "r-7");
    let last = c.wait_for_job(&job, Duration::ZERO, Some(10)).unwrap();
    assert_eq!(last.state(), JobState::Failed);
    assert_eq!(last.text, "Cancelled");
}

#[test]
fn wait_gives_up_after_max_polls() {
    let c = client(MockTransport::new([status(1, "Queued"), status(2, "Running")]));
    let job = JobHandle::new(JobKind::Rebin, "r-8");
    let last = c.wait_for_job(&job, Duration::ZERO, Some(2)).unwrap();
    assert_eq!(last.state(), JobState::Running);
    assert!(!last.state().is_terminal());
}

#[test]
fn timeslice_submission() {
    let c = client(MockTransport::new([json!({"OK": 1, "JobID": 4711})]));
    let request = TimesliceRequest::new()
        .slice("early", "100-500")
        .slice("late", "1000-2000,3000-4000");
    let job = c
        .start_timeslice(&Objects::target_id(221755), &request)
        .unwrap();
    assert_eq!(job.to_string(), "timeslice job 4711");

    let calls = c.transport().calls.borrow();
    assert_eq!(calls[0]["api_name"], "startTimeslice");
    assert_eq!(
        calls[0]["slices"],
        json!([["early", "100-500"], ["late", "1000-2000,3000-4000"]])
    );
}
