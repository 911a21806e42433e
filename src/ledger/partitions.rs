/// Key encoding for the `jobs` partition: job:{job_id}

const JOB_PREFIX: &str = "job:";

pub fn encode_job_key(job_id: &str) -> Vec<u8> {
    format!("{JOB_PREFIX}{job_id}").into_bytes()
}

pub fn decode_job_key(key: &[u8]) -> Option<String> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str
        .strip_prefix(JOB_PREFIX)
        .filter(|id| !id.is_empty())
        .map(String::from)
}
